//! Probe container injection
//!
//! Adds one uniquely named ephemeral container to the target pod through the
//! `ephemeralcontainers` sub-resource. Nothing is rolled back afterwards;
//! ephemeral containers cannot be removed from a pod.

use k8s_openapi::api::core::v1::{EnvVar, EphemeralContainer, Pod};
use serde_json::{json, Value};

use crate::cluster::ClusterApi;
use crate::common::{Error, Result};

use super::resolver::ResolvedTarget;
use super::Destination;

/// Length of the random part of a probe container name
pub const SUFFIX_LEN: usize = 5;

/// Source of container name suffixes
pub trait NameSource: Send + Sync {
    /// A fresh suffix, unique for the lifetime of the process
    fn suffix(&self) -> String;
}

/// Lower-case alphanumeric suffixes from a v4 UUID
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSuffix;

impl NameSource for RandomSuffix {
    fn suffix(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()[..SUFFIX_LEN].to_string()
    }
}

/// The container a probe runs in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectedProbeHandle {
    pub namespace: String,
    pub pod_name: String,
    pub container_name: String,
}

/// Inject a probe container aimed at `destination` into the target pod
pub async fn inject(
    cluster: &dyn ClusterApi,
    names: &dyn NameSource,
    target: &ResolvedTarget,
    destination: &Destination,
    image: &str,
) -> Result<InjectedProbeHandle> {
    let current = cluster
        .get_pod(&target.namespace, &target.pod_name)
        .await
        .map_err(|e| {
            if e.is_not_found() {
                Error::target_not_found("pod", &target.namespace, &target.pod_name)
            } else {
                Error::injection_failed(&target.namespace, &target.pod_name, e)
            }
        })?;

    let container_name = format!("probe-{}", names.suffix());
    let container = probe_container(&container_name, destination, image);
    let patch = ephemeral_container_patch(&current, &container).ok_or_else(|| {
        Error::injection_failed(&target.namespace, &target.pod_name, "pod has no spec")
    })?;
    tracing::debug!(patch = %patch, "Generated patch for probe container");

    cluster
        .patch_ephemeral_containers(&target.namespace, &target.pod_name, &patch)
        .await
        .map_err(|e| classify(e, &target.namespace, &target.pod_name))?;

    tracing::info!(
        pod = %target.pod_name,
        namespace = %target.namespace,
        container = %container_name,
        "Injected probe container"
    );

    Ok(InjectedProbeHandle {
        namespace: target.namespace.clone(),
        pod_name: target.pod_name.clone(),
        container_name,
    })
}

/// The ephemeral container definition for a probe
pub fn probe_container(name: &str, destination: &Destination, image: &str) -> EphemeralContainer {
    let env = |name: &str, value: String| EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    };

    EphemeralContainer {
        name: name.to_string(),
        image: Some(image.to_string()),
        args: Some(vec!["probe".to_string()]),
        env: Some(vec![
            env("PROTOCOL", destination.protocol.to_string()),
            env("ADDRESS", destination.address.clone()),
            env("PORT", destination.port.to_string()),
            env("MESSAGE", destination.message.clone()),
            env(
                "INTERVAL",
                humantime::format_duration(destination.interval).to_string(),
            ),
        ]),
        ..Default::default()
    }
}

/// Strategic merge patch taking `pod` to `pod` plus `container`
///
/// `spec.ephemeralContainers` merges on `name`, so the patch carries only the
/// new entry plus the resulting order of every entry. Returns `None` when the
/// pod has no spec to patch.
pub fn ephemeral_container_patch(pod: &Pod, container: &EphemeralContainer) -> Option<Value> {
    let spec = pod.spec.as_ref()?;
    let order: Vec<Value> = spec
        .ephemeral_containers
        .iter()
        .flatten()
        .map(|c| c.name.as_str())
        .chain(std::iter::once(container.name.as_str()))
        .map(|name| json!({ "name": name }))
        .collect();

    Some(json!({
        "spec": {
            "$setElementOrder/ephemeralContainers": order,
            "ephemeralContainers": [container],
        }
    }))
}

/// Map a rejected patch to a feature or generic injection error
fn classify(err: Error, namespace: &str, pod: &str) -> Error {
    match err {
        Error::Api(status) => {
            // A missing pod names itself in the message; a missing sub-resource does not
            let missing_subresource = (status.code == 404 || status.reason == "NotFound")
                && !status.message.contains(&format!("\"{}\"", pod));
            let kind_mismatch =
                status.message.contains("not registered") || status.message.contains("no kind");

            if missing_subresource || kind_mismatch {
                Error::FeatureUnavailable(status.message)
            } else {
                Error::injection_failed(namespace, pod, status)
            }
        }
        other => Error::injection_failed(namespace, pod, other),
    }
}
