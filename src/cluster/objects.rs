//! Helpers over the Kubernetes object types the probe pipeline reads

use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::Selector;

use crate::common::{Error, Result};

/// Find a container status by name across init, regular and ephemeral containers
pub fn container_status<'a>(pod: &'a Pod, name: &str) -> Option<&'a ContainerStatus> {
    let status = pod.status.as_ref()?;
    [
        &status.init_container_statuses,
        &status.container_statuses,
        &status.ephemeral_container_statuses,
    ]
    .into_iter()
    .flatten()
    .flatten()
    .find(|s| s.name == name)
}

/// Whether the pod is running and not being torn down
pub fn is_running(pod: &Pod) -> bool {
    let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref());
    phase == Some("Running") && pod.metadata.deletion_timestamp.is_none()
}

/// Render a structured selector in the `labelSelector` query syntax
///
/// An empty selector selects everything, which is never what a test case
/// means, so it is rejected along with unknown operators.
pub fn selector_query(selector: &LabelSelector) -> Result<String> {
    let selector = Selector::try_from(selector.clone())
        .map_err(|e| Error::InvalidSelector(e.to_string()))?;
    if selector.selects_all() {
        return Err(Error::InvalidSelector(
            "label selector must not be empty".to_string(),
        ));
    }
    Ok(selector.to_string())
}
