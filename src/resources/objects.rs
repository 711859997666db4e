//! Idempotent lifecycle for the cluster objects the pipeline manages
//!
//! Every named object follows the same pattern: GET, create when absent,
//! and for objects whose content must reflect fresh input (the Dockerfile
//! ConfigMap, the docker-config secret) delete-then-create. Deletions are
//! bounded: 5 attempts at 1-minute intervals, NOT FOUND counting as done.

use std::collections::BTreeMap;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use serde_json::json;
use tokio::time::sleep;
use tracing::{info, warn};

use super::ResourceNaming;
use crate::types::{Error, Result};

const DELETE_MAX_ATTEMPTS: u32 = 5;
const DELETE_RETRY_INTERVAL: Duration = Duration::from_secs(60);
const DELETION_POLL_INTERVAL: Duration = Duration::from_secs(5);

const PVC_STORAGE: &str = "5Gi";

/// Fixed Dockerfile preamble: Ubuntu with Terraform and kubectl installed.
const DOCKERFILE_BASE: &str = r#"FROM ubuntu:latest

RUN apt-get update && \
    apt-get install -y \
    wget \
    curl \
    git \
    unzip \
    jq \
    openssh-client \
    && rm -rf /var/lib/apt/lists/*

RUN wget https://releases.hashicorp.com/terraform/1.8.1/terraform_1.8.1_linux_amd64.zip && \
    unzip terraform_1.8.1_linux_amd64.zip -d /usr/local/bin/ && \
    rm terraform_1.8.1_linux_amd64.zip

RUN curl -LO "https://dl.k8s.io/release/$(curl -L -s https://dl.k8s.io/release/stable.txt)/bin/linux/amd64/kubectl" && \
    install -o root -g root -m 0755 kubectl /usr/local/bin/kubectl && \
    rm kubectl
"#;

const DOCKERFILE_SUFFIX: &str = r#"
WORKDIR /app

COPY . ./

CMD ["/bin/bash"]
"#;

/// Assemble the Dockerfile: fixed preamble, optional provider fragment,
/// fixed suffix.
#[must_use]
pub fn dockerfile_content(provider_additions: Option<&str>) -> String {
    let mut content = String::from(DOCKERFILE_BASE);
    if let Some(additions) = provider_additions {
        content.push('\n');
        content.push_str(additions);
    }
    content.push_str(DOCKERFILE_SUFFIX);
    content
}

/// Create the PVC when absent; an existing PVC is reused regardless of spec.
pub async fn ensure_pvc(pvcs: &Api<PersistentVolumeClaim>, name: &str) -> Result<()> {
    match pvcs.get(name).await {
        Ok(_) => {
            info!("PVC {} already exists", name);
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            let pvc: PersistentVolumeClaim = serde_json::from_value(json!({
                "apiVersion": "v1",
                "kind": "PersistentVolumeClaim",
                "metadata": { "name": name },
                "spec": {
                    "accessModes": ["ReadWriteOnce"],
                    "resources": { "requests": { "storage": PVC_STORAGE } }
                }
            }))?;
            match pvcs.create(&PostParams::default(), &pvc).await {
                Ok(_) => {
                    info!("Created PVC: {}", name);
                    Ok(())
                }
                Err(kube::Error::Api(ae)) if ae.code == 409 => {
                    info!("PVC {} was created concurrently", name);
                    Ok(())
                }
                Err(err) => Err(err.into()),
            }
        }
        Err(err) => Err(err.into()),
    }
}

/// Replace the registry credential secret so rotated credentials take
/// effect. `encoded` is the base64 `.dockerconfigjson`; it is decoded once
/// for validation and stored as handed in.
pub async fn replace_docker_config_secret(
    secrets: &Api<Secret>,
    name: &str,
    encoded: &str,
) -> Result<()> {
    let data = docker_secret_data(encoded)?;

    match secrets.delete(name, &DeleteParams::default()).await {
        Ok(_) => info!("Deleted existing docker config secret: {}", name),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {}
        Err(err) => return Err(err.into()),
    }

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        type_: Some("kubernetes.io/dockerconfigjson".to_string()),
        data: Some(data),
        ..Default::default()
    };

    secrets.create(&PostParams::default(), &secret).await?;
    info!("Created docker config secret: {}", name);
    Ok(())
}

/// Validate the base64 payload and produce the secret data. The encoded
/// string itself is stored, so decoding the stored value always yields the
/// same bytes as decoding the environment value.
fn docker_secret_data(encoded: &str) -> Result<BTreeMap<String, ByteString>> {
    BASE64
        .decode(encoded.trim())
        .map_err(|err| Error::SecretAccessFailed(format!("invalid base64 docker config: {err}")))?;

    Ok(BTreeMap::from([(
        ".dockerconfigjson".to_string(),
        ByteString(encoded.trim().as_bytes().to_vec()),
    )]))
}

/// Replace the Dockerfile ConfigMap for the parent and return its name.
pub async fn create_dockerfile_configmap(
    configmaps: &Api<ConfigMap>,
    parent_name: &str,
    provider_additions: Option<&str>,
) -> Result<String> {
    let name = ResourceNaming::dockerfile_configmap_name(parent_name);

    delete_configmap_with_retry(configmaps, &name).await?;

    let configmap = ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "Dockerfile".to_string(),
            dockerfile_content(provider_additions),
        )])),
        ..Default::default()
    };

    configmaps.create(&PostParams::default(), &configmap).await?;
    info!("Created ConfigMap: {}", name);
    Ok(name)
}

async fn delete_configmap_with_retry(configmaps: &Api<ConfigMap>, name: &str) -> Result<()> {
    match configmaps.get(name).await {
        Ok(_) => {}
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    }

    for attempt in 1..=DELETE_MAX_ATTEMPTS {
        match configmaps.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!("Deleted existing ConfigMap: {}", name);
                return Ok(());
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                return Ok(());
            }
            Err(err) => {
                warn!(
                    "Attempt {}: failed to delete ConfigMap {}: {}",
                    attempt, name, err
                );
                if attempt < DELETE_MAX_ATTEMPTS {
                    sleep(DELETE_RETRY_INTERVAL).await;
                }
            }
        }
    }

    Err(Error::ObjectDeletionFailed {
        kind: "ConfigMap",
        name: name.to_string(),
        attempts: DELETE_MAX_ATTEMPTS,
    })
}

/// Strip finalizers so deletion is not held up by a stuck controller.
pub async fn remove_pod_finalizers(pods: &Api<Pod>, name: &str) -> Result<()> {
    let patch = json!({"metadata": {"finalizers": []}});
    pods.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Delete a pod, retrying transient failures. NOT FOUND counts as success.
pub async fn delete_pod_with_retry(pods: &Api<Pod>, name: &str) -> Result<()> {
    for attempt in 1..=DELETE_MAX_ATTEMPTS {
        match pods.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!("Deleted pod: {}", name);
                return Ok(());
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                return Ok(());
            }
            Err(err) => {
                warn!("Attempt {}: failed to delete pod {}: {}", attempt, name, err);
                if attempt < DELETE_MAX_ATTEMPTS {
                    sleep(DELETE_RETRY_INTERVAL).await;
                }
            }
        }
    }

    Err(Error::ObjectDeletionFailed {
        kind: "Pod",
        name: name.to_string(),
        attempts: DELETE_MAX_ATTEMPTS,
    })
}

/// Poll until the pod is gone.
pub async fn wait_for_pod_deletion(pods: &Api<Pod>, name: &str) -> Result<()> {
    loop {
        match pods.get(name).await {
            Ok(_) => {
                info!("Pod {} is still being deleted, waiting", name);
                sleep(DELETION_POLL_INTERVAL).await;
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Remove finished pods matching the selector so a fresh workload can be
/// created. Pods in flight are left alone; the in-progress check guards
/// against racing them.
pub async fn cleanup_terminal_pods(pods: &Api<Pod>, selector: &str) -> Result<()> {
    let list = pods.list(&ListParams::default().labels(selector)).await?;

    for pod in list.items {
        let phase = pod
            .status
            .as_ref()
            .and_then(|status| status.phase.as_deref())
            .unwrap_or_default();
        if phase != "Succeeded" && phase != "Failed" {
            continue;
        }

        let Some(name) = pod.metadata.name.as_deref() else {
            continue;
        };

        let has_finalizers = pod
            .metadata
            .finalizers
            .as_ref()
            .is_some_and(|finalizers| !finalizers.is_empty());
        if has_finalizers {
            remove_pod_finalizers(pods, name).await?;
        }
        delete_pod_with_retry(pods, name).await?;
        wait_for_pod_deletion(pods, name).await?;
    }

    Ok(())
}

/// Label-selector LIST detecting an already-active workload for the same
/// parent. Used in place of in-process locks so a controller restart cannot
/// create duplicates.
pub async fn workload_in_progress(pods: &Api<Pod>, selector: &str) -> Result<bool> {
    let list = pods.list(&ListParams::default().labels(selector)).await?;
    Ok(list.items.iter().any(pod_is_active))
}

/// A pod counts as active while Pending, Running, or still creating a
/// container.
fn pod_is_active(pod: &Pod) -> bool {
    let Some(status) = pod.status.as_ref() else {
        return false;
    };

    if matches!(status.phase.as_deref(), Some("Running" | "Pending")) {
        return true;
    }

    status.container_statuses.iter().flatten().any(|container| {
        container
            .state
            .as_ref()
            .and_then(|state| state.waiting.as_ref())
            .and_then(|waiting| waiting.reason.as_deref())
            == Some("ContainerCreating")
    })
}
