//! Readiness detection for an injected probe container
//!
//! The readiness state machine is pure: [`transition`] folds one watch event
//! into the current state and [`advance`] folds a batch. The async driver
//! [`wait_for_container`] only feeds it events until a terminal state.

use std::fmt;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cluster::{container_status, ClusterApi, Pod, WatchEvent};
use crate::common::{Error, Result};

use super::injector::InjectedProbeHandle;

/// Stand-in deadline for timeouts too large to add to the clock
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Most notifications folded together when they arrive at once
const MAX_BATCH: usize = 64;

/// Readiness of the probe container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    /// Not reported yet, or waiting (image pull, creation)
    Pending,
    Running,
    /// Started and already exited; its logs are still readable
    Terminated,
    /// The pod itself went away
    Deleted,
    TimedOut,
}

impl ReadinessState {
    /// Whether no further event can change the state
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReadinessState::Pending)
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessState::Pending => write!(f, "pending"),
            ReadinessState::Running => write!(f, "running"),
            ReadinessState::Terminated => write!(f, "terminated"),
            ReadinessState::Deleted => write!(f, "deleted"),
            ReadinessState::TimedOut => write!(f, "timed out"),
        }
    }
}

/// State reached from `state` after observing one event
pub fn transition(
    state: ReadinessState,
    event: &WatchEvent<Pod>,
    container: &str,
) -> ReadinessState {
    if state.is_terminal() {
        return state;
    }
    match event {
        WatchEvent::Deleted(_) => ReadinessState::Deleted,
        WatchEvent::Added(pod) | WatchEvent::Modified(pod) => observe_pod(pod, container),
        WatchEvent::Bookmark(_) | WatchEvent::Error(_) => state,
    }
}

/// State reached after a batch of events; a deletion anywhere in the batch wins
pub fn advance(
    state: ReadinessState,
    events: &[WatchEvent<Pod>],
    container: &str,
) -> ReadinessState {
    if state.is_terminal() {
        return state;
    }
    if events.iter().any(|e| matches!(e, WatchEvent::Deleted(_))) {
        return ReadinessState::Deleted;
    }
    events
        .iter()
        .fold(state, |state, event| transition(state, event, container))
}

fn observe_pod(pod: &Pod, container: &str) -> ReadinessState {
    match container_status(pod, container).and_then(|s| s.state.as_ref()) {
        Some(state) if state.running.is_some() => ReadinessState::Running,
        Some(state) if state.terminated.is_some() => ReadinessState::Terminated,
        _ => ReadinessState::Pending,
    }
}

fn log_waiting(pod: &Pod, container: &str) {
    let waiting = container_status(pod, container)
        .and_then(|s| s.state.as_ref())
        .and_then(|s| s.waiting.as_ref());
    if let Some(waiting) = waiting {
        if let Some(message) = &waiting.message {
            tracing::info!(container, reason = ?waiting.reason, "Waiting: {}", message);
        }
    }
}

/// Wait until the probe container is running or has terminated
///
/// Reads the pod once, then watches it from that version. If the server
/// closes the watch early it is re-established from the last seen version.
pub async fn wait_for_container(
    cluster: &dyn ClusterApi,
    handle: &InjectedProbeHandle,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ReadinessState> {
    let deadline = deadline_after(timeout);
    let container = handle.container_name.as_str();

    let pod = match cluster.get_pod(&handle.namespace, &handle.pod_name).await {
        Ok(pod) => pod,
        Err(e) if e.is_not_found() => return finish(ReadinessState::Deleted, handle, timeout),
        Err(e) => return Err(e),
    };
    log_waiting(&pod, container);
    let mut state = observe_pod(&pod, container);
    let mut resource_version = pod.metadata.resource_version.unwrap_or_default();

    while !state.is_terminal() {
        let events = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep_until(deadline) => {
                state = ReadinessState::TimedOut;
                break;
            }
            watch = cluster.watch_pod(&handle.namespace, &handle.pod_name, &resource_version) => watch?,
        };
        let mut batches = events.ready_chunks(MAX_BATCH);

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep_until(deadline) => {
                    state = ReadinessState::TimedOut;
                    break;
                }
                received = batches.next() => received,
            };

            let Some(received) = received else {
                tracing::debug!(resource_version = %resource_version, "Watch closed, re-subscribing");
                break;
            };

            let mut batch = Vec::with_capacity(received.len());
            for event in received {
                let event = event?;
                match &event {
                    WatchEvent::Error(status) => return Err(Error::Api(status.clone())),
                    WatchEvent::Bookmark(bookmark) => {
                        resource_version = bookmark.metadata.resource_version.clone();
                    }
                    WatchEvent::Added(pod)
                    | WatchEvent::Modified(pod)
                    | WatchEvent::Deleted(pod) => {
                        if let Some(rv) = &pod.metadata.resource_version {
                            resource_version = rv.clone();
                        }
                        tracing::debug!(container, pod = ?pod.metadata.name, "Watch event");
                        log_waiting(pod, container);
                    }
                }
                batch.push(event);
            }

            state = advance(state, &batch, container);
            if state.is_terminal() {
                break;
            }
        }
    }

    finish(state, handle, timeout)
}

/// `now + timeout`, or a point decades away when that would overflow
fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or(now + FAR_FUTURE)
}

fn finish(
    state: ReadinessState,
    handle: &InjectedProbeHandle,
    timeout: Duration,
) -> Result<ReadinessState> {
    match state {
        ReadinessState::Deleted => Err(Error::WatchDeleted {
            namespace: handle.namespace.clone(),
            pod: handle.pod_name.clone(),
        }),
        ReadinessState::TimedOut | ReadinessState::Pending => {
            Err(Error::WatchTimedOut(timeout.as_secs()))
        }
        state => {
            tracing::debug!(container = %handle.container_name, %state, "Probe container started");
            Ok(state)
        }
    }
}
