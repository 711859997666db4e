//! Run orchestration
//!
//! The run pod executes the user's script inside the image built for this
//! sync. A shell wrapper materializes the script on the workspace volume,
//! executes it, and prints `terraform output -json` as the last line of the
//! container logs, which is where the pipeline reads the result back.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, LogParams, PostParams};
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::info;

use super::objects::{cleanup_terminal_pods, workload_in_progress};
use super::ResourceNaming;
use crate::config::RunWorkspace;
use crate::types::{Error, Result};

const COMPLETION_POLL_INTERVAL: Duration = Duration::from_secs(120);

/// TTL annotation on run pods, in seconds.
const RUN_POD_TTL: &str = "3600";

const SCRIPT_PATH: &str = "/workspace/script.sh";

pub struct RunRequest<'a> {
    pub name: &'a str,
    pub env_vars: &'a BTreeMap<String, String>,
    pub script: &'a str,
    pub tagged_image: &'a str,
    pub image_pull_secret: &'a str,
    pub pvc_name: &'a str,
    pub workspace: RunWorkspace,
}

/// Create the run pod and return its name.
///
/// Fails with `RunInProgress` when a pod labelled for this parent is still
/// Pending, Running or creating containers.
pub async fn create_run_pod(pods: &Api<Pod>, request: &RunRequest<'_>) -> Result<String> {
    let selector = ResourceNaming::run_selector(request.name);
    if workload_in_progress(pods, &selector).await? {
        info!("Existing run pod for {} still active", request.name);
        return Err(Error::RunInProgress);
    }
    cleanup_terminal_pods(pods, &selector).await?;

    let timestamp = ResourceNaming::timestamp();
    let pod_name = ResourceNaming::run_pod_name(request.name, &timestamp);

    let pod = run_pod_manifest(request, &pod_name)?;
    pods.create(&PostParams::default(), &pod).await?;

    info!(
        "Created run pod {} with image {}",
        pod_name, request.tagged_image
    );
    Ok(pod_name)
}

/// Poll the pod until it reaches a terminal phase, then parse the
/// Terraform output from its logs.
pub async fn wait_for_pod_completion(pods: &Api<Pod>, pod_name: &str) -> Result<Value> {
    loop {
        let pod = pods.get(pod_name).await?;
        let phase = pod
            .status
            .as_ref()
            .and_then(|status| status.phase.as_deref())
            .unwrap_or_default();

        match phase {
            "Succeeded" => break,
            "Failed" => {
                let detail = pod
                    .status
                    .as_ref()
                    .and_then(|status| status.message.as_deref())
                    .unwrap_or("run pod failed");
                return Err(Error::ExecutionFailed(format!("{pod_name}: {detail}")));
            }
            _ => {
                info!("Run pod {} in phase {:?}, waiting", pod_name, phase);
                sleep(COMPLETION_POLL_INTERVAL).await;
            }
        }
    }

    let logs = pods.logs(pod_name, &LogParams::default()).await?;
    parse_terraform_output(&logs)
}

/// The JSON document is printed as the last non-empty line of the logs.
pub fn parse_terraform_output(logs: &str) -> Result<Value> {
    let last_line = logs
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .ok_or_else(|| Error::OutputParseFailed("run pod produced no output".to_string()))?;

    serde_json::from_str(last_line.trim())
        .map_err(|err| Error::OutputParseFailed(format!("{err}: {last_line}")))
}

/// Wrapper that writes the script to the workspace, runs it, and tails the
/// Terraform output as the final log line.
fn wrapper_script(script: &str) -> String {
    format!(
        r#"set -e
cat <<'TF_SCRIPT_EOF' > {SCRIPT_PATH}
{script}
TF_SCRIPT_EOF
chmod +x {SCRIPT_PATH}
{SCRIPT_PATH}
terraform output -json
"#
    )
}

fn run_pod_manifest(request: &RunRequest<'_>, pod_name: &str) -> Result<Pod> {
    let mut env: Vec<Value> = request
        .env_vars
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();
    env.push(json!({ "name": "SCRIPT", "value": SCRIPT_PATH }));

    let workspace_volume = match request.workspace {
        RunWorkspace::Pvc => json!({
            "name": "workspace",
            "persistentVolumeClaim": { "claimName": request.pvc_name }
        }),
        RunWorkspace::EmptyDir => json!({
            "name": "workspace",
            "emptyDir": {}
        }),
    };

    let manifest = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": pod_name,
            "labels": { "apprun": request.name },
            "annotations": { "kubectl.kubernetes.io/ttl": RUN_POD_TTL }
        },
        "spec": {
            "restartPolicy": "Never",
            "containers": [
                {
                    "name": "terraform",
                    "image": request.tagged_image,
                    "imagePullPolicy": "Always",
                    "command": ["/bin/bash", "-c", wrapper_script(request.script)],
                    "env": env,
                    "volumeMounts": [
                        { "name": "workspace", "mountPath": "/workspace" }
                    ]
                }
            ],
            "volumes": [workspace_volume],
            "imagePullSecrets": [
                { "name": request.image_pull_secret }
            ]
        }
    });

    Ok(serde_json::from_value(manifest)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(env_vars: &BTreeMap<String, String>) -> RunRequest<'_> {
        RunRequest {
            name: "demo",
            env_vars,
            script: "terraform apply -auto-approve",
            tagged_image: "reg/x:20240601120000",
            image_pull_secret: "demo-container-secret",
            pvc_name: "pvc-demo",
            workspace: RunWorkspace::EmptyDir,
        }
    }

    #[test]
    fn wrapper_writes_runs_and_captures() {
        let script = wrapper_script("terraform apply -auto-approve");
        assert!(script.contains("cat <<'TF_SCRIPT_EOF' > /workspace/script.sh"));
        assert!(script.contains("terraform apply -auto-approve"));
        assert!(script.contains("chmod +x /workspace/script.sh"));
        assert!(script.trim_end().ends_with("terraform output -json"));
    }

    #[test]
    fn manifest_carries_env_and_pull_secret() {
        let env_vars = BTreeMap::from([("TF_VAR_env".to_string(), "prod".to_string())]);
        let pod = run_pod_manifest(&request(&env_vars), "demo-docker-run-pod-x").unwrap();

        let spec = pod.spec.unwrap();
        let container = &spec.containers[0];
        assert_eq!(container.image.as_deref(), Some("reg/x:20240601120000"));
        assert_eq!(container.image_pull_policy.as_deref(), Some("Always"));

        let env = container.env.as_ref().unwrap();
        assert!(env.iter().any(|e| e.name == "TF_VAR_env"));
        assert!(env
            .iter()
            .any(|e| e.name == "SCRIPT" && e.value.as_deref() == Some("/workspace/script.sh")));

        assert_eq!(
            spec.image_pull_secrets.as_ref().unwrap()[0].name,
            "demo-container-secret"
        );
    }

    #[test]
    fn workspace_flavor_follows_config() {
        let env_vars = BTreeMap::new();
        let mut req = request(&env_vars);

        let pod = run_pod_manifest(&req, "p").unwrap();
        let volumes = pod.spec.unwrap().volumes.unwrap();
        assert!(volumes[0].empty_dir.is_some());

        req.workspace = RunWorkspace::Pvc;
        let pod = run_pod_manifest(&req, "p").unwrap();
        let volumes = pod.spec.unwrap().volumes.unwrap();
        assert_eq!(
            volumes[0].persistent_volume_claim.as_ref().unwrap().claim_name,
            "pvc-demo"
        );
    }

    #[test]
    fn output_is_last_non_empty_line() {
        let logs = "Apply complete!\n\n{\"vpc_id\":{\"value\":\"vpc-123\"}}\n\n";
        let output = parse_terraform_output(logs).unwrap();
        assert_eq!(output["vpc_id"]["value"], "vpc-123");
    }

    #[test]
    fn garbage_output_is_a_parse_failure() {
        let err = parse_terraform_output("not json at all").unwrap_err();
        assert!(matches!(err, Error::OutputParseFailed(_)));

        let err = parse_terraform_output("").unwrap_err();
        assert!(matches!(err, Error::OutputParseFailed(_)));
    }
}
