pub mod terraform;

pub use terraform::{
    ConfigMapKeyRef, ContainerRegistrySpec, GitRepoSpec, Scripts, ScriptSource, SecretKeyRef,
    SyncRequest, Terraform, TerraformSpec, TerraformStatus,
};
