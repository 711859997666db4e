//! Reconciler
//!
//! Two entry points feed one synchronous handler: the periodic walk lists
//! every `Terraform` resource across namespaces and spawns a handler task
//! per item, and the sync webhook hands decoded requests straight in. All
//! cross-invocation coordination happens through cluster objects (labels,
//! finalizers, status), never through in-process locks.

pub mod script;

use std::time::Duration;

use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Secret};
use kube::api::{Api, ListParams};
use kube::ResourceExt;
use serde_json::{json, Map, Value};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::crds::{SecretKeyRef, SyncRequest, Terraform};
use crate::resources::build::{create_build_pod, BuildRequest};
use crate::resources::run::{create_run_pod, wait_for_pod_completion, RunRequest};
use crate::resources::{objects, ResourceNaming};
use crate::status;
use crate::types::{Context, Error, Result};
use crate::util::extract_env_vars;

/// Attempts for the run step before the sync is marked Failed.
const MAX_RUN_RETRIES: u32 = 5;
const RUN_RETRY_DELAY: Duration = Duration::from_secs(5 * 60);

/// Periodic reconciliation. The interval runs from the end of one walk to
/// the start of the next.
pub async fn run_reconciler(ctx: Context) {
    loop {
        walk(&ctx).await;
        sleep(ctx.config.sync_interval).await;
    }
}

#[instrument(skip(ctx))]
async fn walk(ctx: &Context) {
    let api: Api<Terraform> = Api::all(ctx.client.clone());

    let list = match api.list(&ListParams::default()).await {
        Ok(list) => list,
        Err(err) => {
            error!("Failed to list Terraform resources: {}", err);
            return;
        }
    };

    info!("Reconcile walk over {} Terraform resource(s)", list.items.len());

    for item in list.items {
        let finalizing = item.metadata.deletion_timestamp.is_some();
        let request = SyncRequest {
            parent: item,
            finalizing,
        };
        let ctx = ctx.clone();
        tokio::spawn(async move {
            handle(&ctx, request).await;
        });
    }
}

/// Drive one sync to its terminal status. Every stage publishes before
/// advancing; the returned map is the last status published.
#[instrument(skip(ctx, request), fields(name = %request.parent.name_any(), finalizing = request.finalizing))]
pub async fn handle(ctx: &Context, request: SyncRequest) -> Value {
    let parent = &request.parent;
    let name = parent.name_any();
    let namespace = parent.namespace().unwrap_or_else(|| "default".to_string());
    let operation = if request.finalizing { "destroy" } else { "apply" };
    // Each stage publishes before advancing; terminal statuses return the
    // published map so the webhook can echo it.
    macro_rules! publish {
        ($status:expr) => {{
            let status = $status;
            status::publish(&ctx.client, &namespace, &name, &status).await;
            status
        }};
    }

    publish!(status::progressing("Starting processing"));

    // Script resolution (destroy while finalizing, apply otherwise)
    let source = script::select(&parent.spec.scripts, request.finalizing);
    let script_text = match script::resolve(&ctx.client, &namespace, source).await {
        Ok(text) => text,
        Err(err) => {
            warn!("Script resolution failed for {}: {}", name, err);
            return publish!(status::error_status(&format!("Error {operation}: {err}")));
        }
    };

    // SSH key: per-workload secret, else controller-wide fallback
    let ssh_key = match resolve_ssh_key(ctx, &namespace, parent.spec.git_repo.ssh_key_secret.as_ref())
        .await
    {
        Ok(key) => key,
        Err(err) => {
            warn!("SSH key resolution failed for {}: {}", name, err);
            return publish!(status::error_status(&err.to_string()));
        }
    };

    publish!(status::progressing("Setting up provider"));

    let provider_name = parent
        .spec
        .backend
        .get("provider")
        .filter(|provider| !provider.is_empty());

    let plugin = match provider_name {
        Some(provider) => {
            let workspace = parent.label("workspace").unwrap_or_default();
            let region = parent.label("region").unwrap_or_default();
            let plugin =
                match ctx
                    .plugins
                    .setup_plugin(ctx.client.clone(), provider, workspace, region)
                {
                    Ok(plugin) => plugin,
                    Err(err) => {
                        warn!("Provider setup failed for {}: {}", name, err);
                        return publish!(status::error_status(&err.to_string()));
                    }
                };
            if let Err(err) = plugin.setup_backend(&parent.spec.backend).await {
                warn!("Backend setup failed for {}: {}", name, err);
                return publish!(status::error_status(&err.to_string()));
            }
            Some(plugin)
        }
        None => None,
    };

    publish!(status::progressing("Creating Dockerfile ConfigMap"));

    let configmaps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &namespace);
    let additions = plugin.as_ref().map(|plugin| plugin.dockerfile_additions());
    let configmap_name =
        match objects::create_dockerfile_configmap(&configmaps, &name, additions.as_deref()).await {
            Ok(configmap_name) => configmap_name,
            Err(err) => {
                warn!("Dockerfile ConfigMap failed for {}: {}", name, err);
                return publish!(status::error_status(&err.to_string()));
            }
        };

    publish!(status::progressing("Creating Docker config secret"));

    let Some(encoded_docker_config) = ctx.config.container_registry_secret.as_deref() else {
        let err = Error::ConfigMissing("CONTAINER_REGISTRY_SECRET".to_string());
        warn!("{} for {}", err, name);
        return publish!(status::error_status(&err.to_string()));
    };

    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), &namespace);
    let docker_secret_name = ResourceNaming::docker_secret_name(&name);
    if let Err(err) =
        objects::replace_docker_config_secret(&secrets, &docker_secret_name, encoded_docker_config)
            .await
    {
        warn!("Docker config secret failed for {}: {}", name, err);
        return publish!(status::error_status(&err.to_string()));
    }

    publish!(status::progressing("Creating PVC"));

    let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), &namespace);
    let pvc_name = ResourceNaming::pvc_name(&name);
    if let Err(err) = objects::ensure_pvc(&pvcs, &pvc_name).await {
        warn!("PVC ensure failed for {}: {}", name, err);
        return publish!(status::error_status(&err.to_string()));
    }

    publish!(status::progressing("Building and tagging image"));

    let pods: Api<Pod> = Api::namespaced(ctx.client.clone(), &namespace);
    let repo_dir = ResourceNaming::repo_dir(&name);
    let build_request = BuildRequest {
        name: &name,
        configmap_name: &configmap_name,
        image_name: &parent.spec.container_registry.image_name,
        docker_secret_name: &docker_secret_name,
        pvc_name: &pvc_name,
        repo_url: &parent.spec.git_repo.url,
        branch: &parent.spec.git_repo.branch,
        ssh_key: &ssh_key,
        repo_dir: &repo_dir,
    };
    let tagged_image = match create_build_pod(&pods, &pvcs, &build_request).await {
        Ok((tagged_image, _pod_name)) => tagged_image,
        Err(err) => {
            warn!("Build failed for {}: {}", name, err);
            return publish!(status::error_status(&err.to_string()));
        }
    };

    publish!(status::progressing("Running Terraform"));

    let env_vars = extract_env_vars(&parent.spec.variables, &parent.spec.backend);
    let run_request = RunRequest {
        name: &name,
        env_vars: &env_vars,
        script: &script_text,
        tagged_image: &tagged_image,
        image_pull_secret: &docker_secret_name,
        pvc_name: &pvc_name,
        workspace: ctx.config.run_workspace,
    };

    let output = match run_with_retries(&pods, &run_request).await {
        Ok(output) => output,
        Err(err) => {
            warn!("Run failed for {}: {}", name, err);
            return publish!(status::failed(&err.to_string()));
        }
    };

    if request.finalizing {
        return publish!(status::success("Destroy completed successfully"));
    }

    let mut final_status = json!({
        "state": "Completed",
        "message": "Processing completed successfully",
        "output": output,
    });

    let ingress_urls = filter_outputs(&output, &["ingress"]);
    if !ingress_urls.is_empty() {
        final_status["ingressURLs"] = Value::Object(ingress_urls);
    }
    let credentials = filter_outputs(&output, &["credential", "password"]);
    if !credentials.is_empty() {
        final_status["credentials"] = Value::Object(credentials);
    }

    if let Some(plugin) = plugin {
        match plugin.execute().await {
            Ok(cloud_resources) => {
                final_status["cloudResources"] = Value::Object(cloud_resources);
            }
            Err(err) => {
                warn!("Provider execute failed for {}: {}", name, err);
                return publish!(status::error_status(&err.to_string()));
            }
        }
    }

    publish!(final_status)
}

/// Run step with bounded retry: up to `MAX_RUN_RETRIES` attempts with a
/// fixed delay, returning on the first success.
async fn run_with_retries(pods: &Api<Pod>, request: &RunRequest<'_>) -> Result<Value> {
    let mut last_err = Error::ExecutionFailed("run step never attempted".to_string());

    for attempt in 1..=MAX_RUN_RETRIES {
        match run_once(pods, request).await {
            Ok(output) => return Ok(output),
            Err(err) => {
                warn!(
                    "Run attempt {}/{} failed: {}",
                    attempt, MAX_RUN_RETRIES, err
                );
                last_err = err;
                if attempt < MAX_RUN_RETRIES {
                    sleep(RUN_RETRY_DELAY).await;
                }
            }
        }
    }

    Err(last_err)
}

async fn run_once(pods: &Api<Pod>, request: &RunRequest<'_>) -> Result<Value> {
    let pod_name = create_run_pod(pods, request).await?;
    wait_for_pod_completion(pods, &pod_name).await
}

async fn resolve_ssh_key(
    ctx: &Context,
    namespace: &str,
    secret_ref: Option<&SecretKeyRef>,
) -> Result<String> {
    match secret_ref {
        Some(reference) if !reference.name.is_empty() && !reference.key.is_empty() => {
            let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), namespace);
            let secret = secrets.get(&reference.name).await.map_err(|err| {
                Error::SecretAccessFailed(format!("secret {}: {err}", reference.name))
            })?;

            let value = secret
                .data
                .as_ref()
                .and_then(|data| data.get(&reference.key))
                .ok_or_else(|| {
                    Error::SecretAccessFailed(format!(
                        "key {} not found in secret {}",
                        reference.key, reference.name
                    ))
                })?;

            String::from_utf8(value.0.clone()).map_err(|err| {
                Error::SecretAccessFailed(format!(
                    "secret {} key {} is not UTF-8: {err}",
                    reference.name, reference.key
                ))
            })
        }
        _ => Ok(ctx.config.git_ssh_secret.clone().unwrap_or_default()),
    }
}

/// Project output entries whose key mentions one of the needles into their
/// own status field.
fn filter_outputs(output: &Value, needles: &[&str]) -> Map<String, Value> {
    let mut filtered = Map::new();
    if let Some(entries) = output.as_object() {
        for (key, value) in entries {
            let lowered = key.to_lowercase();
            if needles.iter().any(|needle| lowered.contains(needle)) {
                filtered.insert(key.clone(), value.clone());
            }
        }
    }
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingress_and_credential_outputs_are_projected() {
        let output = json!({
            "ingress_url": {"value": "https://app.example.com"},
            "db_password": {"value": "hunter2"},
            "vpc_id": {"value": "vpc-123"}
        });

        let ingress = filter_outputs(&output, &["ingress"]);
        assert!(ingress.contains_key("ingress_url"));
        assert!(!ingress.contains_key("vpc_id"));

        let creds = filter_outputs(&output, &["credential", "password"]);
        assert!(creds.contains_key("db_password"));
        assert_eq!(creds.len(), 1);
    }

    #[test]
    fn non_object_output_projects_nothing() {
        assert!(filter_outputs(&json!("plain"), &["ingress"]).is_empty());
    }
}
