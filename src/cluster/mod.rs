//! Kubernetes control plane access
//!
//! Everything the probe pipeline reads from or writes to the cluster goes
//! through the [`ClusterApi`] trait.

pub mod client;
pub mod objects;

pub use client::{ClusterApi, KubeClient, LogStream, WatchStream};
pub use k8s_openapi::api::apps::v1::Deployment;
pub use k8s_openapi::api::core::v1::{ContainerStatus, EphemeralContainer, Pod};
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
pub use kube::core::{ErrorResponse, WatchEvent};
pub use objects::{container_status, is_running, selector_query};
