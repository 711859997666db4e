//! `Terraform` Custom Resource Definition observed by the controller

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn default_branch() -> String {
    "main".to_string()
}

/// Reference to a key inside a Secret
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct SecretKeyRef {
    /// Name of the secret
    pub name: String,
    /// Key within the secret
    pub key: String,
}

/// Reference to a key inside a ConfigMap
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct ConfigMapKeyRef {
    /// Name of the ConfigMap
    pub name: String,
    /// Key within the ConfigMap
    pub key: String,
}

/// A script given either inline or through a ConfigMap key.
/// Exactly one of the two fields is expected to be populated.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct ScriptSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline: Option<String>,

    #[serde(
        default,
        rename = "configMapRef",
        skip_serializing_if = "Option::is_none"
    )]
    pub config_map_ref: Option<ConfigMapKeyRef>,
}

/// Apply and destroy entry points for the workload
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
pub struct Scripts {
    #[serde(default)]
    pub apply: ScriptSource,

    #[serde(default)]
    pub destroy: ScriptSource,
}

/// Git repository holding the Terraform project
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct GitRepoSpec {
    /// Clone URL (SSH form for private repositories)
    pub url: String,

    /// Branch to check out
    #[serde(default = "default_branch")]
    pub branch: String,

    /// Per-workload SSH key; falls back to the controller-wide key when absent
    #[serde(default, rename = "sshKeySecret", skip_serializing_if = "Option::is_none")]
    pub ssh_key_secret: Option<SecretKeyRef>,
}

/// Target registry for the built image
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
pub struct ContainerRegistrySpec {
    /// Registry path without tag (e.g. "registry.example.com/team/app")
    #[serde(rename = "imageName")]
    pub image_name: String,

    /// Registry credential reference
    #[serde(default, rename = "secretRef", skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretKeyRef>,
}

/// `Terraform` CRD describing one infrastructure workload
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(group = "alustan.io", version = "v1alpha1", kind = "Terraform")]
#[kube(namespaced)]
#[kube(status = "TerraformStatus")]
#[kube(printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
pub struct TerraformSpec {
    /// Variables exported into the execution environment
    #[serde(default)]
    pub variables: BTreeMap<String, String>,

    /// Backend configuration; `backend["provider"]` selects a plugin.
    /// Empty means no backend setup.
    #[serde(default)]
    pub backend: BTreeMap<String, String>,

    /// Apply/destroy scripts
    #[serde(default)]
    pub scripts: Scripts,

    /// Source repository
    #[serde(rename = "gitRepo")]
    pub git_repo: GitRepoSpec,

    /// Image destination and pull credentials
    #[serde(rename = "containerRegistry")]
    pub container_registry: ContainerRegistrySpec,
}

/// Open status mapping written through the status subresource.
/// Always carries `state` and `message`; may carry `output`,
/// `ingressURLs`, `credentials` and `cloudResources`.
pub type TerraformStatus = BTreeMap<String, serde_json::Value>;

impl Terraform {
    /// Read a label from the parent's metadata (plugins consume
    /// `workspace` and `region`).
    #[must_use]
    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }
}

/// One unit of reconciliation work, produced either by the sync webhook
/// or by the periodic walk.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct SyncRequest {
    pub parent: Terraform,

    #[serde(default)]
    pub finalizing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_inline_script() {
        let source: ScriptSource =
            serde_json::from_value(serde_json::json!({"inline": "terraform apply"})).unwrap();
        assert_eq!(source.inline.as_deref(), Some("terraform apply"));
        assert!(source.config_map_ref.is_none());
    }

    #[test]
    fn deserializes_configmap_script() {
        let source: ScriptSource = serde_json::from_value(serde_json::json!({
            "configMapRef": {"name": "scripts", "key": "apply.sh"}
        }))
        .unwrap();
        let cm = source.config_map_ref.unwrap();
        assert_eq!(cm.name, "scripts");
        assert_eq!(cm.key, "apply.sh");
    }

    #[test]
    fn branch_defaults_to_main() {
        let repo: GitRepoSpec =
            serde_json::from_value(serde_json::json!({"url": "git@example.com:x/y.git"})).unwrap();
        assert_eq!(repo.branch, "main");
        assert!(repo.ssh_key_secret.is_none());
    }

    #[test]
    fn finalizing_defaults_to_false() {
        let request: SyncRequest = serde_json::from_value(serde_json::json!({
            "parent": {
                "apiVersion": "alustan.io/v1alpha1",
                "kind": "Terraform",
                "metadata": {"name": "demo", "namespace": "default"},
                "spec": {
                    "gitRepo": {"url": "git@example.com:x/y.git", "branch": "main"},
                    "containerRegistry": {"imageName": "reg/x"}
                }
            }
        }))
        .unwrap();
        assert!(!request.finalizing);
        assert_eq!(request.parent.spec.container_registry.image_name, "reg/x");
    }
}
