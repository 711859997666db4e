//! AWS backend provider
//!
//! Remote state lives in an S3 bucket with a DynamoDB table for locking.
//! Both are created on demand; an already-owned bucket or an in-use table
//! counts as success. The post-run fetch reads the ArgoCD admin secret for
//! the parent's workspace from Secrets Manager.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb::types::{
    AttributeDefinition, KeySchemaElement, KeyType, ProvisionedThroughput, ScalarAttributeType,
};
use kube::Client;
use serde_json::{Map, Value};
use tracing::info;

use super::BackendProvider;
use crate::types::{Error, Result};

pub struct AwsProvider {
    workspace: String,
    region: String,
}

impl AwsProvider {
    #[must_use]
    pub fn new(workspace: &str, region: &str) -> Self {
        Self {
            workspace: workspace.to_string(),
            region: region.to_string(),
        }
    }

    /// Registry constructor. The Kubernetes client is part of the plugin
    /// contract but the AWS provider only talks to AWS.
    pub fn construct(_client: Client, workspace: &str, region: &str) -> Arc<dyn BackendProvider> {
        Arc::new(Self::new(workspace, region))
    }

    async fn sdk_config(&self) -> aws_config::SdkConfig {
        aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .load()
            .await
    }

    async fn setup_s3(&self, bucket: &str) -> Result<()> {
        let client = aws_sdk_s3::Client::new(&self.sdk_config().await);
        if let Err(err) = client.create_bucket().bucket(bucket).send().await {
            let service_err = err.into_service_error();
            if !service_err.is_bucket_already_owned_by_you() {
                return Err(Error::BackendSetupFailed(format!(
                    "failed to create S3 bucket {bucket}: {service_err}"
                )));
            }
        }
        info!("S3 bucket {} is ready", bucket);
        Ok(())
    }

    async fn setup_dynamodb(&self, table: &str) -> Result<()> {
        let client = aws_sdk_dynamodb::Client::new(&self.sdk_config().await);

        let key_schema = KeySchemaElement::builder()
            .attribute_name("LockID")
            .key_type(KeyType::Hash)
            .build()
            .map_err(|err| Error::BackendSetupFailed(err.to_string()))?;
        let attribute = AttributeDefinition::builder()
            .attribute_name("LockID")
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(|err| Error::BackendSetupFailed(err.to_string()))?;
        let throughput = ProvisionedThroughput::builder()
            .read_capacity_units(1)
            .write_capacity_units(1)
            .build()
            .map_err(|err| Error::BackendSetupFailed(err.to_string()))?;

        let result = client
            .create_table()
            .table_name(table)
            .key_schema(key_schema)
            .attribute_definitions(attribute)
            .provisioned_throughput(throughput)
            .send()
            .await;

        if let Err(err) = result {
            let service_err = err.into_service_error();
            if !service_err.is_resource_in_use_exception() {
                return Err(Error::BackendSetupFailed(format!(
                    "failed to create DynamoDB table {table}: {service_err}"
                )));
            }
        }
        info!("DynamoDB table {} is ready", table);
        Ok(())
    }

    async fn retrieve_secret(&self, secret_name: &str) -> Result<String> {
        let client = aws_sdk_secretsmanager::Client::new(&self.sdk_config().await);
        let response = client
            .get_secret_value()
            .secret_id(secret_name)
            .send()
            .await
            .map_err(|err| {
                Error::BackendSetupFailed(format!(
                    "failed to retrieve secret {secret_name}: {}",
                    err.into_service_error()
                ))
            })?;

        response
            .secret_string()
            .map(str::to_string)
            .ok_or_else(|| {
                Error::BackendSetupFailed(format!("secret {secret_name} has no string value"))
            })
    }
}

#[async_trait]
impl BackendProvider for AwsProvider {
    async fn setup_backend(&self, backend: &BTreeMap<String, String>) -> Result<()> {
        let bucket = backend
            .get("s3")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::BackendSetupFailed("backend is missing the s3 bucket name".to_string()))?;
        let table = backend
            .get("dynamoDB")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                Error::BackendSetupFailed("backend is missing the dynamoDB table name".to_string())
            })?;

        self.setup_s3(bucket).await?;
        self.setup_dynamodb(table).await?;
        Ok(())
    }

    fn dockerfile_additions(&self) -> String {
        r#"RUN curl "https://awscli.amazonaws.com/awscli-exe-linux-x86_64.zip" -o "awscliv2.zip" && \
    unzip awscliv2.zip && \
    ./aws/install && \
    rm -rf awscliv2.zip aws
"#
        .to_string()
    }

    async fn execute(&self) -> Result<Map<String, Value>> {
        let secret_name = format!("argocd-{}", self.workspace);
        let password = self.retrieve_secret(&secret_name).await?;

        let mut resources = Map::new();
        resources.insert("argocdUsername".to_string(), Value::String("admin".to_string()));
        resources.insert("argocdPassword".to_string(), Value::String(password));
        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dockerfile_additions_install_the_cli() {
        let provider = AwsProvider::new("staging", "us-east-1");
        let fragment = provider.dockerfile_additions();
        assert!(fragment.contains("awscli-exe-linux-x86_64.zip"));
        assert!(fragment.contains("./aws/install"));
    }

    #[tokio::test]
    async fn setup_backend_requires_bucket_and_table() {
        let provider = AwsProvider::new("staging", "us-east-1");

        let missing_bucket = BTreeMap::from([("provider".to_string(), "aws".to_string())]);
        let err = provider.setup_backend(&missing_bucket).await.unwrap_err();
        assert!(err.to_string().contains("s3 bucket"));

        let missing_table = BTreeMap::from([
            ("provider".to_string(), "aws".to_string()),
            ("s3".to_string(), "state-bucket".to_string()),
        ]);
        let err = provider.setup_backend(&missing_table).await.unwrap_err();
        assert!(err.to_string().contains("dynamoDB table"));
    }
}
