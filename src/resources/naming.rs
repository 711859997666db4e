//! Derived object names
//!
//! Every cluster object the pipeline manages is named as a pure function
//! of the parent name, so reconciliation never needs a stored mapping.

use chrono::Utc;

pub struct ResourceNaming;

impl ResourceNaming {
    /// Docker config secret holding the registry `.dockerconfigjson`.
    #[must_use]
    pub fn docker_secret_name(name: &str) -> String {
        format!("{name}-container-secret")
    }

    /// ConfigMap carrying the generated Dockerfile.
    #[must_use]
    pub fn dockerfile_configmap_name(name: &str) -> String {
        format!("{name}-dockerfile-configmap")
    }

    /// Workspace PVC shared by the clone and build containers.
    #[must_use]
    pub fn pvc_name(name: &str) -> String {
        format!("pvc-{name}")
    }

    /// Build pod name; the timestamp keeps successive builds distinct.
    #[must_use]
    pub fn build_pod_name(name: &str, timestamp: &str) -> String {
        format!("{name}-docker-build-pod-{timestamp}")
    }

    /// Run pod name.
    #[must_use]
    pub fn run_pod_name(name: &str, timestamp: &str) -> String {
        format!("{name}-docker-run-pod-{timestamp}")
    }

    /// Checkout directory on the shared workspace volume.
    #[must_use]
    pub fn repo_dir(name: &str) -> String {
        format!("/workspace/tmp/{name}")
    }

    /// Label selector detecting an in-flight build for this parent.
    #[must_use]
    pub fn build_selector(name: &str) -> String {
        format!("appbuild={name}")
    }

    /// Label selector detecting an in-flight run for this parent.
    #[must_use]
    pub fn run_selector(name: &str) -> String {
        format!("apprun={name}")
    }

    /// Image tag linking a build to its run.
    #[must_use]
    pub fn tagged_image(image_name: &str, timestamp: &str) -> String {
        format!("{image_name}:{timestamp}")
    }

    /// Timestamp used for pod names and image tags.
    #[must_use]
    pub fn timestamp() -> String {
        Utc::now().format("%Y%m%d%H%M%S").to_string()
    }
}
