/*
 * Terraform Controller - Kubernetes Orchestrator for Terraform Workloads
 * Copyright (C) 2025 Alustan
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

//! Repository staging helper baked into the build pod's clone image.
//!
//! Reads `REPO_URL`, `BRANCH`, `REPO_DIR` and optionally `SSH_KEY` from
//! the environment and places the branch checkout at `REPO_DIR`. An
//! existing checkout is updated in place. Failures are retried inside
//! this process; exhausting the attempts terminates the pod.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use git2::build::{CheckoutBuilder, RepoBuilder};
use git2::{Cred, FetchOptions, RemoteCallbacks, Repository};
use tracing::{info, warn};

const CLONE_ATTEMPTS: u32 = 5;
const CLONE_RETRY_DELAY: Duration = Duration::from_secs(30);

fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let repo_url = std::env::var("REPO_URL").context("REPO_URL must be set")?;
    let branch = std::env::var("BRANCH").context("BRANCH must be set")?;
    let repo_dir = std::env::var("REPO_DIR").context("REPO_DIR must be set")?;
    let ssh_key = std::env::var("SSH_KEY").ok().filter(|key| !key.is_empty());

    for attempt in 1..=CLONE_ATTEMPTS {
        match stage_repository(&repo_url, &branch, Path::new(&repo_dir), ssh_key.as_deref()) {
            Ok(()) => {
                info!("Repository {} staged at {}", repo_url, repo_dir);
                return Ok(());
            }
            Err(err) if attempt < CLONE_ATTEMPTS => {
                warn!(
                    "Attempt {}/{} failed to stage {}: {:#}",
                    attempt, CLONE_ATTEMPTS, repo_url, err
                );
                std::thread::sleep(CLONE_RETRY_DELAY);
            }
            Err(err) => {
                return Err(err.context(format!(
                    "failed to stage {repo_url} after {CLONE_ATTEMPTS} attempts"
                )));
            }
        }
    }

    bail!("unreachable: attempts exhausted without a result")
}

fn stage_repository(url: &str, branch: &str, dir: &Path, ssh_key: Option<&str>) -> Result<()> {
    if dir.join(".git").exists() {
        update_checkout(url, branch, dir, ssh_key)
    } else {
        clone_branch(url, branch, dir, ssh_key)
    }
}

fn fetch_options(ssh_key: Option<&str>) -> FetchOptions<'static> {
    let mut callbacks = RemoteCallbacks::new();
    if let Some(key) = ssh_key {
        let key = key.to_string();
        callbacks.credentials(move |_url, username, _allowed| {
            Cred::ssh_key_from_memory(username.unwrap_or("git"), None, &key, None)
        });
    }

    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks);
    options
}

fn clone_branch(url: &str, branch: &str, dir: &Path, ssh_key: Option<&str>) -> Result<()> {
    RepoBuilder::new()
        .branch(branch)
        .fetch_options(fetch_options(ssh_key))
        .clone(url, dir)
        .with_context(|| format!("unable to clone {url} (branch {branch})"))?;
    Ok(())
}

fn update_checkout(url: &str, branch: &str, dir: &Path, ssh_key: Option<&str>) -> Result<()> {
    let repo = Repository::open(dir).with_context(|| format!("unable to open {}", dir.display()))?;

    {
        let mut remote = repo
            .find_remote("origin")
            .context("checkout has no origin remote")?;
        remote
            .fetch(&[branch], Some(&mut fetch_options(ssh_key)), None)
            .with_context(|| format!("unable to fetch {url} (branch {branch})"))?;
    }

    let target = repo
        .revparse_single(&format!("refs/remotes/origin/{branch}"))
        .with_context(|| format!("branch {branch} not found on origin"))?;
    repo.checkout_tree(&target, Some(CheckoutBuilder::new().force()))
        .context("unable to check out fetched tree")?;
    repo.set_head_detached(target.id())
        .context("unable to move HEAD to fetched commit")?;

    Ok(())
}
