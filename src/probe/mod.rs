//! Probe orchestration pipeline
//!
//! One test case flows through these stages in order:
//! resolve a target pod, inject the probe container, wait for it to start,
//! then read its status records until the expectation is met or violated.

pub mod asserter;
pub mod injector;
pub mod resolver;
pub mod stream;
pub mod watcher;

use serde::Deserialize;
use std::time::Duration;

use crate::agent::Protocol;
use crate::common::config::deserialize_duration;

pub use asserter::{assert_records, Expectation};
pub use injector::{inject, InjectedProbeHandle, NameSource, RandomSuffix};
pub use resolver::{resolve, GroupingRef, ResolvedTarget, TargetSelector};
pub use stream::{RecordReader, StatusRecord};
pub use watcher::{wait_for_container, ReadinessState};

/// Where the injected probe connects to and how
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Destination {
    /// Host name or IP address
    #[serde(alias = "host")]
    pub address: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    /// Payload written on every connection
    #[serde(default = "default_message")]
    pub message: String,
    /// Delay between two dial attempts
    #[serde(default = "default_interval", deserialize_with = "deserialize_duration")]
    pub interval: Duration,
    /// Probe image for this case only
    #[serde(default)]
    pub image: Option<String>,
}

fn default_message() -> String {
    "hello world".to_string()
}

fn default_interval() -> Duration {
    Duration::from_secs(5)
}
