//! Status publisher
//!
//! Writes the parent's status through the status subresource using the
//! dynamic API: read the current representation, replace the `status`
//! field wholesale, write it back against the current resourceVersion.
//! Publish failures are logged and never abort the pipeline.

use kube::api::{Api, ApiResource, DynamicObject, PostParams};
use kube::Client;
use serde_json::{json, Value};
use tracing::warn;

use crate::types::Result;

pub const API_GROUP: &str = "alustan.io";
pub const API_VERSION: &str = "v1alpha1";
pub const KIND: &str = "Terraform";
pub const PLURAL: &str = "terraforms";

fn parent_api(client: Client, namespace: &str) -> Api<DynamicObject> {
    let resource = ApiResource {
        group: API_GROUP.to_string(),
        version: API_VERSION.to_string(),
        api_version: format!("{API_GROUP}/{API_VERSION}"),
        kind: KIND.to_string(),
        plural: PLURAL.to_string(),
    };
    Api::namespaced_with(client, namespace, &resource)
}

/// Replace the parent's status with `status`.
pub async fn update_status(
    client: &Client,
    namespace: &str,
    name: &str,
    status: &Value,
) -> Result<()> {
    let api = parent_api(client.clone(), namespace);

    let mut parent = api.get(name).await?;
    parent.data["status"] = status.clone();

    api.replace_status(name, &PostParams::default(), serde_json::to_vec(&parent)?)
        .await?;
    Ok(())
}

/// Publish a status update, logging failures instead of propagating them
/// so a flaky status write cannot mask the pipeline outcome.
pub async fn publish(client: &Client, namespace: &str, name: &str, status: &Value) {
    if let Err(err) = update_status(client, namespace, name, status).await {
        warn!(
            "Failed to publish status for {}/{}: {} (status was {})",
            namespace, name, err, status
        );
    }
}

#[must_use]
pub fn progressing(message: &str) -> Value {
    json!({ "state": "Progressing", "message": message })
}

#[must_use]
pub fn error_status(message: &str) -> Value {
    json!({ "state": "error", "message": message })
}

#[must_use]
pub fn failed(message: &str) -> Value {
    json!({ "state": "Failed", "message": message })
}

#[must_use]
pub fn success(message: &str) -> Value {
    json!({ "state": "Success", "message": message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_maps_carry_state_and_message() {
        let status = progressing("Creating PVC");
        assert_eq!(status["state"], "Progressing");
        assert_eq!(status["message"], "Creating PVC");

        assert_eq!(error_status("boom")["state"], "error");
        assert_eq!(failed("boom")["state"], "Failed");
        assert_eq!(success("done")["state"], "Success");
    }
}
