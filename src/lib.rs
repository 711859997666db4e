/*
 * Terraform Controller - Kubernetes Orchestrator for Terraform Workloads
 * Copyright (C) 2025 Alustan
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Controller core library
//!
//! This crate reconciles `Terraform` custom resources into in-cluster
//! executions: it assembles a build context from the referenced Git
//! repository, builds and pushes a tagged container image, runs the
//! user's apply/destroy script inside the cluster, and publishes the
//! captured output on the parent's status subresource.

pub mod config;
pub mod crds;
pub mod plugins;
pub mod resources;
pub mod status;
pub mod sync;
pub mod types;
pub mod util;

// Re-export commonly used types
pub use crds::{SyncRequest, Terraform, TerraformSpec, TerraformStatus};
pub use types::{Context, Error, Result};
