//! Test suite configuration types
//!
//! Defines the data structures for deserializing YAML or TOML suite files.

use serde::Deserialize;
use std::path::Path;

use crate::cluster::LabelSelector;
use crate::common::config::Timeouts;
use crate::common::{Error, Result};
use crate::probe::{Destination, Expectation, GroupingRef, TargetSelector};

/// A complete test suite loaded from a file
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TestSuite {
    /// Probe image used unless a case overrides it
    #[serde(default)]
    pub probe_image: Option<String>,
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Cases, run in declaration order
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
}

/// A single reachability check
#[derive(Deserialize, Debug, Clone)]
pub struct TestCase {
    pub description: String,
    pub expect: Expect,
    pub from: FromConfig,
    pub to: Destination,
}

/// Expected outcome of a test case
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    #[serde(alias = "pass")]
    Pass,
    #[serde(alias = "fail")]
    Fail,
}

impl From<Expect> for Expectation {
    fn from(expect: Expect) -> Self {
        match expect {
            Expect::Pass => Expectation::Reachable,
            Expect::Fail => Expectation::Unreachable,
        }
    }
}

/// Where a test case originates, as written in the suite
///
/// Exactly one of the fields must be set; this is checked when the case runs.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct FromConfig {
    #[serde(default)]
    pub deployment: Option<ObjectSelector>,
    #[serde(default)]
    pub pod: Option<ObjectSelector>,
}

/// An object named directly or picked by labels
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSelector {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub label_selector: Option<LabelSelector>,
}

fn default_namespace() -> String {
    "default".to_string()
}

enum ObjectRef {
    Name(String),
    Labels(LabelSelector),
}

impl ObjectSelector {
    fn object_ref(&self, kind: &str) -> Result<ObjectRef> {
        match (&self.name, &self.label_selector) {
            (Some(name), None) if !name.is_empty() => Ok(ObjectRef::Name(name.clone())),
            (None, Some(selector)) if has_terms(selector) => {
                Ok(ObjectRef::Labels(selector.clone()))
            }
            (Some(_), Some(_)) => Err(Error::InvalidSelector(format!(
                "{} selector sets both name and labelSelector",
                kind
            ))),
            _ => Err(Error::InvalidSelector(format!(
                "{} selector needs a name or a non-empty labelSelector",
                kind
            ))),
        }
    }
}

fn has_terms(selector: &LabelSelector) -> bool {
    selector.match_labels.as_ref().is_some_and(|l| !l.is_empty())
        || selector.match_expressions.as_ref().is_some_and(|e| !e.is_empty())
}

impl TryFrom<&FromConfig> for TargetSelector {
    type Error = Error;

    fn try_from(from: &FromConfig) -> Result<Self> {
        match (&from.deployment, &from.pod) {
            (Some(deployment), None) => {
                let grouping = match deployment.object_ref("deployment")? {
                    ObjectRef::Name(name) => GroupingRef::Name(name),
                    ObjectRef::Labels(selector) => GroupingRef::Labels(selector),
                };
                Ok(TargetSelector::ByGrouping {
                    namespace: deployment.namespace.clone(),
                    grouping,
                })
            }
            (None, Some(pod)) => Ok(match pod.object_ref("pod")? {
                ObjectRef::Name(name) => TargetSelector::ByName {
                    namespace: pod.namespace.clone(),
                    name,
                },
                ObjectRef::Labels(selector) => TargetSelector::ByLabelSelector {
                    namespace: pod.namespace.clone(),
                    selector,
                },
            }),
            (Some(_), Some(_)) => Err(Error::InvalidSelector(
                "'from' sets both deployment and pod".to_string(),
            )),
            (None, None) => Err(Error::InvalidSelector(
                "'from' needs a deployment or a pod".to_string(),
            )),
        }
    }
}

/// Load a suite from a `.yaml`/`.yml` or `.toml` file
pub fn load_suite(path: &Path) -> Result<TestSuite> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
        path: path.display().to_string(),
        error: e.to_string(),
    })?;

    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    let suite: TestSuite = if is_toml {
        toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))?
    } else {
        serde_yaml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))?
    };

    if suite.test_cases.is_empty() {
        return Err(Error::Config(format!(
            "suite '{}' has no test cases",
            path.display()
        )));
    }
    Ok(suite)
}
