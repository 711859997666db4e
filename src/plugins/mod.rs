//! Backend plugin registry
//!
//! A backend provider contributes three things to the pipeline: remote
//! state setup before the build, a Dockerfile fragment installing its
//! tooling, and a post-run credential fetch. Providers register by name
//! at process start and the registry is read-only afterwards.

pub mod aws;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use kube::Client;
use serde_json::{Map, Value};

use crate::types::{Error, Result};

#[async_trait]
pub trait BackendProvider: Send + Sync {
    /// Ensure remote state storage and locking exist for this backend.
    async fn setup_backend(&self, backend: &BTreeMap<String, String>) -> Result<()>;

    /// Shell fragment appended to the generated Dockerfile.
    fn dockerfile_additions(&self) -> String;

    /// Post-run credential and resource retrieval, attached to the parent
    /// status as `cloudResources`.
    async fn execute(&self) -> Result<Map<String, Value>>;
}

/// Constructor binding a provider to the current parent's labels.
type ProviderConstructor = fn(Client, &str, &str) -> Arc<dyn BackendProvider>;

pub struct PluginRegistry {
    providers: HashMap<&'static str, ProviderConstructor>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    /// Registry with every built-in provider registered.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("aws", aws::AwsProvider::construct);
        registry
    }

    pub fn register(&mut self, name: &'static str, constructor: ProviderConstructor) {
        self.providers.insert(name, constructor);
    }

    /// Construct the named provider bound to the parent's `workspace` and
    /// `region` labels.
    pub fn setup_plugin(
        &self,
        client: Client,
        provider: &str,
        workspace: &str,
        region: &str,
    ) -> Result<Arc<dyn BackendProvider>> {
        let constructor = self.constructor(provider)?;
        Ok(constructor(client, workspace, region))
    }

    fn constructor(&self, provider: &str) -> Result<&ProviderConstructor> {
        self.providers
            .get(provider)
            .ok_or_else(|| Error::UnknownProvider(provider.to_string()))
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_is_an_error() {
        let registry = PluginRegistry::with_builtin();
        let err = registry.constructor("gcp").unwrap_err();
        assert!(err.to_string().contains("unknown provider type"));
        assert!(err.to_string().contains("gcp"));
    }

    #[test]
    fn aws_is_registered() {
        let registry = PluginRegistry::with_builtin();
        assert!(registry.constructor("aws").is_ok());
    }
}
