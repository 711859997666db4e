//! Shared error and context types for the controller.

use std::sync::Arc;

use kube::Client;
use thiserror::Error;

use crate::config::ControllerConfig;
use crate::plugins::PluginRegistry;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("missing configuration: {0}")]
    ConfigMissing(String),

    #[error("no script provided for operation")]
    NoScript,

    #[error("failed to resolve script: {0}")]
    ScriptResolutionFailed(String),

    #[error("failed to read secret: {0}")]
    SecretAccessFailed(String),

    #[error("unknown provider type: {0}")]
    UnknownProvider(String),

    #[error("backend setup failed: {0}")]
    BackendSetupFailed(String),

    #[error("existing build pod already running")]
    BuildInProgress,

    #[error("existing run pod already running")]
    RunInProgress,

    #[error("failed to delete {kind} {name} after {attempts} attempts")]
    ObjectDeletionFailed {
        kind: &'static str,
        name: String,
        attempts: u32,
    },

    #[error("terraform execution failed: {0}")]
    ExecutionFailed(String),

    #[error("failed to parse terraform output: {0}")]
    OutputParseFailed(String),
}

/// Shared state handed to every pipeline stage.
///
/// The Kubernetes client is thread-safe and the plugin registry is
/// read-only after startup, so the context is freely cloned into the
/// per-resource handler tasks.
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub config: Arc<ControllerConfig>,
    pub plugins: Arc<PluginRegistry>,
}
