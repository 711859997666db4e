//! Controller configuration
//!
//! Everything is sourced from the environment at startup; the controller
//! keeps no configuration files.

use std::time::Duration;

use tracing::warn;

const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Workspace volume used by run pods. Fixed per deployment, not per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunWorkspace {
    /// Fresh scratch volume for every run.
    EmptyDir,
    /// Share the build PVC so state persists across build and run.
    Pvc,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Delay between the end of one reconcile walk and the start of the next.
    pub sync_interval: Duration,

    /// Base64-encoded `.dockerconfigjson` used for image push/pull.
    /// Absence is a fatal pipeline error for any sync that builds.
    pub container_registry_secret: Option<String>,

    /// Fallback SSH private key for cloning private repositories when the
    /// parent does not carry its own `sshKeySecret`.
    pub git_ssh_secret: Option<String>,

    /// Workspace volume flavor for run pods.
    pub run_workspace: RunWorkspace,
}

impl ControllerConfig {
    pub fn from_env() -> Self {
        let sync_interval = match std::env::var("SYNC_INTERVAL") {
            Ok(raw) => match parse_interval(&raw) {
                Some(interval) => interval,
                None => {
                    warn!(
                        "Invalid SYNC_INTERVAL {:?}, using default {:?}",
                        raw, DEFAULT_SYNC_INTERVAL
                    );
                    DEFAULT_SYNC_INTERVAL
                }
            },
            Err(_) => DEFAULT_SYNC_INTERVAL,
        };

        let run_workspace = match std::env::var("RUN_WORKSPACE").as_deref() {
            Ok("pvc") => RunWorkspace::Pvc,
            _ => RunWorkspace::EmptyDir,
        };

        Self {
            sync_interval,
            container_registry_secret: std::env::var("CONTAINER_REGISTRY_SECRET").ok(),
            git_ssh_secret: std::env::var("GIT_SSH_SECRET").ok(),
            run_workspace,
        }
    }
}

/// Parse a Go-style duration string (`10m`, `2h`, `90s`, bare seconds).
fn parse_interval(raw: &str) -> Option<Duration> {
    let s = raw.trim().to_lowercase();
    if s.is_empty() {
        return None;
    }

    if let Some(hours) = s.strip_suffix('h') {
        let h: u64 = hours.parse().ok()?;
        return Some(Duration::from_secs(h * 3600));
    }

    if let Some(mins) = s.strip_suffix('m') {
        let m: u64 = mins.parse().ok()?;
        return Some(Duration::from_secs(m * 60));
    }

    if let Some(secs) = s.strip_suffix('s') {
        let sec: u64 = secs.parse().ok()?;
        return Some(Duration::from_secs(sec));
    }

    s.parse().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minute_suffix() {
        assert_eq!(parse_interval("10m"), Some(Duration::from_secs(600)));
    }

    #[test]
    fn parses_hour_and_second_suffixes() {
        assert_eq!(parse_interval("2h"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_interval("90s"), Some(Duration::from_secs(90)));
    }

    #[test]
    fn bare_number_is_seconds() {
        assert_eq!(parse_interval("30"), Some(Duration::from_secs(30)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_interval("soon"), None);
        assert_eq!(parse_interval(""), None);
        assert_eq!(parse_interval("10x"), None);
    }
}
