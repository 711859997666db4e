//! Wire-shape tests for the sync webhook payload.

use controller::SyncRequest;
use serde_json::json;

fn full_request() -> serde_json::Value {
    json!({
        "parent": {
            "apiVersion": "alustan.io/v1alpha1",
            "kind": "Terraform",
            "metadata": {
                "name": "test-resource",
                "namespace": "default",
                "labels": { "workspace": "staging", "region": "us-east-1" }
            },
            "spec": {
                "variables": { "var1": "value1" },
                "backend": {
                    "provider": "aws",
                    "s3": "state-bucket",
                    "dynamoDB": "state-locks"
                },
                "scripts": {
                    "apply": { "inline": "terraform apply -auto-approve" },
                    "destroy": { "inline": "terraform destroy -auto-approve" }
                },
                "gitRepo": {
                    "url": "git@github.com:example/test.git",
                    "branch": "main",
                    "sshKeySecret": { "name": "ssh-secret", "key": "ssh-key" }
                },
                "containerRegistry": {
                    "imageName": "example/image",
                    "secretRef": { "name": "registry-secret", "key": "secret-key" }
                }
            }
        },
        "finalizing": false
    })
}

#[test]
fn decodes_a_full_sync_request() {
    let request: SyncRequest = serde_json::from_value(full_request()).unwrap();

    let parent = &request.parent;
    assert_eq!(parent.metadata.name.as_deref(), Some("test-resource"));
    assert_eq!(parent.metadata.namespace.as_deref(), Some("default"));
    assert_eq!(parent.label("workspace"), Some("staging"));
    assert_eq!(parent.label("region"), Some("us-east-1"));

    assert_eq!(parent.spec.variables.get("var1").unwrap(), "value1");
    assert_eq!(parent.spec.backend.get("provider").unwrap(), "aws");
    assert_eq!(
        parent.spec.scripts.apply.inline.as_deref(),
        Some("terraform apply -auto-approve")
    );
    assert_eq!(parent.spec.git_repo.url, "git@github.com:example/test.git");
    assert_eq!(
        parent
            .spec
            .git_repo
            .ssh_key_secret
            .as_ref()
            .unwrap()
            .name,
        "ssh-secret"
    );
    assert_eq!(parent.spec.container_registry.image_name, "example/image");
    assert!(!request.finalizing);
}

#[test]
fn finalizing_flag_round_trips() {
    let mut body = full_request();
    body["finalizing"] = json!(true);

    let request: SyncRequest = serde_json::from_value(body).unwrap();
    assert!(request.finalizing);
}

#[test]
fn minimal_spec_fills_defaults() {
    let request: SyncRequest = serde_json::from_value(json!({
        "parent": {
            "apiVersion": "alustan.io/v1alpha1",
            "kind": "Terraform",
            "metadata": { "name": "bare", "namespace": "default" },
            "spec": {
                "gitRepo": { "url": "https://github.com/example/public.git" },
                "containerRegistry": { "imageName": "example/image" }
            }
        }
    }))
    .unwrap();

    let spec = &request.parent.spec;
    assert!(spec.variables.is_empty());
    assert!(spec.backend.is_empty());
    assert!(spec.scripts.apply.inline.is_none());
    assert!(spec.scripts.apply.config_map_ref.is_none());
    assert_eq!(spec.git_repo.branch, "main");
    assert!(!request.finalizing);
}

#[test]
fn malformed_body_is_rejected() {
    let err = serde_json::from_str::<SyncRequest>("{\"parent\": 42}").unwrap_err();
    assert!(!err.to_string().is_empty());
}
