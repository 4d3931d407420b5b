//! kubectl-probe - network reachability tests for Kubernetes workloads
//!
//! This library resolves a workload to a running pod, injects an ephemeral
//! probe container into it and asserts on the probe's reported results.

pub mod agent;
pub mod cluster;
pub mod commands;
pub mod common;
pub mod probe;
pub mod testing;

// Re-export commonly used types for tests
pub use cluster::{ClusterApi, KubeClient};
pub use common::{Error, Result};
