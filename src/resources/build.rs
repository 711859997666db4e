//! Build orchestration
//!
//! A build pod stages the repository onto the shared PVC through two init
//! containers and then lets kaniko produce and push the tagged image. The
//! tag is the single handle linking this build to its run.

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::api::{Api, PostParams};
use serde_json::json;
use tracing::info;

use super::objects::{cleanup_terminal_pods, ensure_pvc, workload_in_progress};
use super::ResourceNaming;
use crate::types::{Error, Result};

const KANIKO_IMAGE: &str = "gcr.io/kaniko-project/executor:v1.23.1-debug";
const GIT_CLONE_IMAGE: &str = "ghcr.io/alustan/terraform-controller-gitclone:latest";
const SETUP_IMAGE: &str = "busybox:1.36";

/// TTL annotation on build pods, in seconds.
const BUILD_POD_TTL: &str = "1800";

pub struct BuildRequest<'a> {
    pub name: &'a str,
    pub configmap_name: &'a str,
    pub image_name: &'a str,
    pub docker_secret_name: &'a str,
    pub pvc_name: &'a str,
    pub repo_url: &'a str,
    pub branch: &'a str,
    pub ssh_key: &'a str,
    pub repo_dir: &'a str,
}

/// Create the build pod and return `(tagged_image, pod_name)`.
///
/// Fails with `BuildInProgress` when a pod labelled for this parent is
/// still Pending, Running or creating containers.
pub async fn create_build_pod(
    pods: &Api<Pod>,
    pvcs: &Api<PersistentVolumeClaim>,
    request: &BuildRequest<'_>,
) -> Result<(String, String)> {
    ensure_pvc(pvcs, request.pvc_name).await?;

    let selector = ResourceNaming::build_selector(request.name);
    if workload_in_progress(pods, &selector).await? {
        info!("Existing build pod for {} still active", request.name);
        return Err(Error::BuildInProgress);
    }
    cleanup_terminal_pods(pods, &selector).await?;

    let timestamp = ResourceNaming::timestamp();
    let pod_name = ResourceNaming::build_pod_name(request.name, &timestamp);
    let tagged_image = ResourceNaming::tagged_image(request.image_name, &timestamp);

    let pod = build_pod_manifest(request, &pod_name, &tagged_image)?;
    pods.create(&PostParams::default(), &pod).await?;

    info!("Created build pod: {}", pod_name);
    info!("Image will be pushed with tag: {}", tagged_image);
    Ok((tagged_image, pod_name))
}

fn build_pod_manifest(
    request: &BuildRequest<'_>,
    pod_name: &str,
    tagged_image: &str,
) -> Result<Pod> {
    let manifest = json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": pod_name,
            "labels": { "appbuild": request.name },
            "annotations": { "kubectl.kubernetes.io/ttl": BUILD_POD_TTL }
        },
        "spec": {
            "restartPolicy": "Never",
            "initContainers": [
                {
                    "name": "setup-repo-dir",
                    "image": SETUP_IMAGE,
                    "command": [
                        "/bin/sh", "-c",
                        format!("mkdir -p {dir} && chmod 0777 {dir}", dir = request.repo_dir)
                    ],
                    "volumeMounts": [
                        { "name": "workspace", "mountPath": "/workspace" }
                    ]
                },
                {
                    "name": "git-clone",
                    "image": GIT_CLONE_IMAGE,
                    "env": [
                        { "name": "REPO_URL", "value": request.repo_url },
                        { "name": "BRANCH", "value": request.branch },
                        { "name": "REPO_DIR", "value": request.repo_dir },
                        { "name": "SSH_KEY", "value": request.ssh_key }
                    ],
                    "volumeMounts": [
                        { "name": "workspace", "mountPath": "/workspace" }
                    ]
                }
            ],
            "containers": [
                {
                    "name": "kaniko",
                    "image": KANIKO_IMAGE,
                    "args": [
                        "--dockerfile=/config/Dockerfile",
                        format!("--context=dir://{}", request.repo_dir),
                        format!("--destination={tagged_image}")
                    ],
                    "env": [
                        { "name": "DOCKER_CONFIG", "value": "/root/.docker" }
                    ],
                    "volumeMounts": [
                        { "name": "dockerfile-config", "mountPath": "/config" },
                        { "name": "workspace", "mountPath": "/workspace" },
                        { "name": "docker-credentials", "mountPath": "/root/.docker" }
                    ]
                }
            ],
            "volumes": [
                {
                    "name": "workspace",
                    "persistentVolumeClaim": { "claimName": request.pvc_name }
                },
                {
                    "name": "dockerfile-config",
                    "configMap": {
                        "name": request.configmap_name,
                        "items": [ { "key": "Dockerfile", "path": "Dockerfile" } ]
                    }
                },
                {
                    "name": "docker-credentials",
                    "secret": {
                        "secretName": request.docker_secret_name,
                        "items": [ { "key": ".dockerconfigjson", "path": "config.json" } ]
                    }
                }
            ]
        }
    });

    Ok(serde_json::from_value(manifest)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> BuildRequest<'static> {
        BuildRequest {
            name: "demo",
            configmap_name: "demo-dockerfile-configmap",
            image_name: "reg/x",
            docker_secret_name: "demo-container-secret",
            pvc_name: "pvc-demo",
            repo_url: "git@example.com:x/y.git",
            branch: "main",
            ssh_key: "",
            repo_dir: "/workspace/tmp/demo",
        }
    }

    #[test]
    fn manifest_labels_and_tags_line_up() {
        let pod = build_pod_manifest(&request(), "demo-docker-build-pod-20240601120000", "reg/x:20240601120000")
            .unwrap();

        let labels = pod.metadata.labels.unwrap();
        assert_eq!(labels.get("appbuild").unwrap(), "demo");

        let spec = pod.spec.unwrap();
        let kaniko = &spec.containers[0];
        let args = kaniko.args.as_ref().unwrap();
        assert!(args.contains(&"--destination=reg/x:20240601120000".to_string()));
        assert!(args.contains(&"--context=dir:///workspace/tmp/demo".to_string()));
    }

    #[test]
    fn clone_container_reads_the_contract_env() {
        let pod = build_pod_manifest(&request(), "p", "reg/x:t").unwrap();
        let spec = pod.spec.unwrap();
        let init = spec.init_containers.unwrap();
        assert_eq!(init[0].name, "setup-repo-dir");
        assert_eq!(init[1].name, "git-clone");

        let env = init[1].env.as_ref().unwrap();
        let names: Vec<&str> = env.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["REPO_URL", "BRANCH", "REPO_DIR", "SSH_KEY"]);
    }

    #[test]
    fn workspace_is_the_shared_pvc() {
        let pod = build_pod_manifest(&request(), "p", "reg/x:t").unwrap();
        let spec = pod.spec.unwrap();
        let workspace = spec
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .find(|v| v.name == "workspace")
            .unwrap();
        assert_eq!(
            workspace
                .persistent_volume_claim
                .as_ref()
                .unwrap()
                .claim_name,
            "pvc-demo"
        );
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
    }
}
