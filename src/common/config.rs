//! Shared configuration settings
//!
//! Timeouts and image defaults that apply to every test case in a suite.

use serde::{Deserialize, Deserializer};
use std::time::Duration;

/// Image used for the injected probe container unless overridden
pub const DEFAULT_PROBE_IMAGE: &str = "ghcr.io/superorbital/kubectl-probe:latest";

/// Timeout settings in seconds
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
    /// How long to wait for the probe container to start
    #[serde(default = "default_watch")]
    pub watch_secs: u64,

    /// How long to wait for a reachability verdict once logs are attached
    #[serde(default = "default_assert")]
    pub assert_secs: u64,

    /// Backward window requested when attaching to the probe's logs
    #[serde(default = "default_log_since")]
    pub log_since_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            watch_secs: default_watch(),
            assert_secs: default_assert(),
            log_since_secs: default_log_since(),
        }
    }
}

impl Timeouts {
    pub fn watch(&self) -> Duration {
        Duration::from_secs(self.watch_secs)
    }

    pub fn assert(&self) -> Duration {
        Duration::from_secs(self.assert_secs)
    }
}

fn default_watch() -> u64 {
    60
}
fn default_assert() -> u64 {
    60
}
fn default_log_since() -> u64 {
    60
}

/// Deserialize a duration written as `500ms`, `1m30s`, `2h` or a bare number of seconds
pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => humantime::parse_duration(&text).map_err(serde::de::Error::custom),
    }
}
