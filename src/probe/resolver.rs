//! Target resolution
//!
//! Turns a logical target (a pod by name, a pod by labels, or a deployment)
//! into exactly one running pod. Resolution never mutates the cluster.

use std::fmt;

use crate::cluster::{is_running, selector_query, ClusterApi, LabelSelector, Pod};
use crate::common::{Error, Result};

/// Which pod a test case originates from
#[derive(Debug, Clone, PartialEq)]
pub enum TargetSelector {
    /// A single pod by name
    ByName { namespace: String, name: String },
    /// Any running pod matching the selector
    ByLabelSelector {
        namespace: String,
        selector: LabelSelector,
    },
    /// A pod owned by a deployment
    ByGrouping {
        namespace: String,
        grouping: GroupingRef,
    },
}

/// How a deployment is identified
#[derive(Debug, Clone, PartialEq)]
pub enum GroupingRef {
    Name(String),
    Labels(LabelSelector),
}

impl TargetSelector {
    pub fn namespace(&self) -> &str {
        match self {
            Self::ByName { namespace, .. }
            | Self::ByLabelSelector { namespace, .. }
            | Self::ByGrouping { namespace, .. } => namespace,
        }
    }
}

impl fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ByName { namespace, name } => write!(f, "pod {}/{}", namespace, name),
            Self::ByLabelSelector { namespace, selector } => {
                let query = selector_query(selector).unwrap_or_else(|_| "<invalid>".into());
                write!(f, "pod in {} matching '{}'", namespace, query)
            }
            Self::ByGrouping {
                namespace,
                grouping: GroupingRef::Name(name),
            } => write!(f, "deployment {}/{}", namespace, name),
            Self::ByGrouping {
                namespace,
                grouping: GroupingRef::Labels(selector),
            } => {
                let query = selector_query(selector).unwrap_or_else(|_| "<invalid>".into());
                write!(f, "deployment in {} matching '{}'", namespace, query)
            }
        }
    }
}

/// The pod a probe will be injected into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub namespace: String,
    pub pod_name: String,
}

/// Resolve a target to a single running pod
pub async fn resolve(cluster: &dyn ClusterApi, target: &TargetSelector) -> Result<ResolvedTarget> {
    let resolved = match target {
        TargetSelector::ByName { namespace, name } => {
            let pod = cluster.get_pod(namespace, name).await.map_err(|e| {
                if e.is_not_found() {
                    Error::target_not_found("pod", namespace, name)
                } else {
                    e
                }
            })?;
            ResolvedTarget {
                namespace: namespace.clone(),
                pod_name: pod.metadata.name.unwrap_or_else(|| name.clone()),
            }
        }
        TargetSelector::ByLabelSelector { namespace, selector } => {
            pod_for_selector(cluster, namespace, selector).await?
        }
        TargetSelector::ByGrouping { namespace, grouping } => {
            let selector = deployment_selector(cluster, namespace, grouping).await?;
            pod_for_selector(cluster, namespace, &selector).await?
        }
    };

    tracing::debug!(target = %target, pod = %resolved.pod_name, "Resolved target");
    Ok(resolved)
}

async fn deployment_selector(
    cluster: &dyn ClusterApi,
    namespace: &str,
    grouping: &GroupingRef,
) -> Result<LabelSelector> {
    let deployment = match grouping {
        GroupingRef::Name(name) => cluster.get_deployment(namespace, name).await.map_err(|e| {
            if e.is_not_found() {
                Error::target_not_found("deployment", namespace, name)
            } else {
                e
            }
        })?,
        GroupingRef::Labels(selector) => {
            let query = selector_query(selector)?;
            let mut deployments = cluster.list_deployments(namespace, &query).await?;
            deployments.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
            deployments
                .into_iter()
                .next()
                .ok_or_else(|| Error::NoMatchingDeployment {
                    namespace: namespace.to_string(),
                    selector: query,
                })?
        }
    };

    let name = deployment.metadata.name.unwrap_or_default();
    let selector = deployment.spec.map(|spec| spec.selector).unwrap_or_default();
    if selector_query(&selector).is_err() {
        return Err(Error::InvalidSelector(format!(
            "deployment '{}/{}' has an empty or invalid pod selector",
            namespace, name
        )));
    }
    Ok(selector)
}

async fn pod_for_selector(
    cluster: &dyn ClusterApi,
    namespace: &str,
    selector: &LabelSelector,
) -> Result<ResolvedTarget> {
    let query = selector_query(selector)?;
    let pods = cluster.list_pods(namespace, &query).await?;

    let pod_name = pick_pod(pods).ok_or_else(|| Error::NoMatchingPod {
        namespace: namespace.to_string(),
        selector: query,
    })?;

    Ok(ResolvedTarget {
        namespace: namespace.to_string(),
        pod_name,
    })
}

/// Choose among candidates: running pods only, lowest name first
fn pick_pod(pods: Vec<Pod>) -> Option<String> {
    pods.into_iter()
        .filter(is_running)
        .filter_map(|p| p.metadata.name)
        .min()
}
