//! Error types for kubectl-probe
//!
//! Every failure inside a test case pipeline maps to one variant here so the
//! suite runner can report it verbatim against the case description.

use std::fmt;
use std::io;
use thiserror::Error;

use kube::core::ErrorResponse;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for kubectl-probe
#[derive(Error, Debug)]
pub enum Error {
    // === Target Resolution Errors ===
    #[error("{kind} '{namespace}/{name}' not found")]
    TargetNotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("No running pod matches selector '{selector}' in namespace '{namespace}'")]
    NoMatchingPod { namespace: String, selector: String },

    #[error("No deployment matches selector '{selector}' in namespace '{namespace}'")]
    NoMatchingDeployment { namespace: String, selector: String },

    #[error("Invalid target selector: {0}")]
    InvalidSelector(String),

    // === Injection Errors ===
    #[error("Ephemeral containers are disabled for this cluster (error from server: {0})")]
    FeatureUnavailable(String),

    #[error("Failed to inject probe container into '{namespace}/{pod}': {reason}")]
    InjectionFailed {
        namespace: String,
        pod: String,
        reason: String,
    },

    // === Readiness Errors ===
    #[error("Timed out after {0} seconds waiting for probe container to start")]
    WatchTimedOut(u64),

    #[error("Pod '{namespace}/{pod}' was deleted before the probe container started")]
    WatchDeleted { namespace: String, pod: String },

    // === Result Stream Errors ===
    #[error("Malformed status record from probe: {0}")]
    StreamDecode(String),

    #[error("Probe log stream ended before a verdict was reached")]
    StreamEnded,

    #[error("No reachability verdict within {0} seconds")]
    AssertionTimeout(u64),

    #[error("{0}")]
    AssertionMismatch(String),

    // === Cluster API Errors ===
    #[error("Cluster API request failed: {0}")]
    Api(ErrorResponse),

    #[error("Cluster client error: {0}")]
    Kube(kube::Error),

    #[error("Cannot reach cluster at {server}: {reason}")]
    Connect { server: String, reason: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Suite Errors ===
    #[error("Interrupted")]
    Cancelled,

    #[error("{}", SuiteFailures(.0))]
    SuiteFailed(Vec<CaseFailure>),
}

impl Error {
    /// Create a not-found error for a named object
    pub fn target_not_found(kind: &str, namespace: &str, name: &str) -> Self {
        Self::TargetNotFound {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Create an injection failure for a pod
    pub fn injection_failed(namespace: &str, pod: &str, reason: impl fmt::Display) -> Self {
        Self::InjectionFailed {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the API reported the object as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Api(status) if status.code == 404)
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(status) => Error::Api(status),
            other => Error::Kube(other),
        }
    }
}

/// A single failed test case with its reason
#[derive(Debug)]
pub struct CaseFailure {
    pub description: String,
    pub error: Error,
}

impl fmt::Display for CaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.description, self.error)
    }
}

struct SuiteFailures<'a>(&'a [CaseFailure]);

impl fmt::Display for SuiteFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} test case(s) failed", self.0.len())?;
        for failure in self.0 {
            write!(f, "\n  - {}", failure)?;
        }
        Ok(())
    }
}
