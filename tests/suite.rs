//! Suite runner tests against an in-memory cluster
//!
//! The fake cluster serves pods, deployments, watch events and probe logs
//! from fixed tables so the whole pipeline runs without a control plane.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use kubectl_probe::cluster::{
    ClusterApi, Deployment, ErrorResponse, LogStream, Pod, WatchEvent, WatchStream,
};
use kubectl_probe::common::config::Timeouts;
use kubectl_probe::probe::NameSource;
use kubectl_probe::testing::{run_suite, RunContext, SuiteReport, TestSuite};
use kubectl_probe::{Error, Result};

/// How the injected container behaves in a given pod
#[derive(Clone)]
enum Behaviour {
    /// Starts and writes these log lines
    Starts(&'static str),
    /// Never leaves the waiting state
    Stuck,
    /// The pod is deleted while waiting
    PodDeleted,
    /// The API rejects the patch
    Rejected(ErrorResponse),
}

struct FakeCluster {
    pods: HashMap<String, Value>,
    behaviours: HashMap<String, Behaviour>,
    deployments: HashMap<String, Value>,
    patches: Mutex<Vec<(String, Value)>>,
}

fn status(code: u16, reason: &str, message: String) -> ErrorResponse {
    ErrorResponse {
        status: "Failure".into(),
        message,
        reason: reason.into(),
        code,
    }
}

fn not_found(kind: &str, name: &str) -> Error {
    Error::Api(status(404, "NotFound", format!("{} \"{}\" not found", kind, name)))
}

fn pod_json(name: &str, app: &str, phase: &str) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": name, "namespace": "shop", "resourceVersion": "100", "labels": {"app": app}},
        "spec": {"containers": [{"name": "app", "image": "nginx"}]},
        "status": {"phase": phase}
    })
}

fn with_container_state(pod: &Value, container: &str, state: Value) -> Pod {
    let mut pod = pod.clone();
    pod["metadata"]["resourceVersion"] = json!("101");
    pod["status"]["ephemeralContainerStatuses"] = json!([{
        "name": container, "image": "probe:test", "imageID": "", "ready": false,
        "restartCount": 0, "state": state
    }]);
    serde_json::from_value(pod).unwrap()
}

impl FakeCluster {
    fn new() -> Self {
        let mut cluster = FakeCluster {
            pods: HashMap::new(),
            behaviours: HashMap::new(),
            deployments: HashMap::new(),
            patches: Mutex::new(Vec::new()),
        };

        cluster.add_pod("web-pass", "pass", Behaviour::Starts(
            "{\"success\":0,\"fail\":0}\n{\"success\":1,\"fail\":0}\n",
        ));
        cluster.add_pod("web-refused", "refused", Behaviour::Starts(
            "{\"success\":0,\"fail\":0}\n{\"success\":0,\"fail\":1}\n",
        ));
        cluster.add_pod("web-stuck", "stuck", Behaviour::Stuck);
        cluster.add_pod("web-gone", "gone", Behaviour::PodDeleted);
        cluster.add_pod("web-nofeature", "nofeature", Behaviour::Rejected(status(
            404,
            "NotFound",
            "the server could not find the requested resource".into(),
        )));

        let ok_logs = Behaviour::Starts("{\"success\":1,\"fail\":0}\n");
        cluster.add_pod("frontend-b", "frontend", ok_logs.clone());
        cluster.add_pod("frontend-a", "frontend", ok_logs.clone());
        cluster
            .pods
            .insert("frontend-0".into(), pod_json("frontend-0", "frontend", "Pending"));
        cluster.behaviours.insert("frontend-0".into(), ok_logs);

        cluster.deployments.insert(
            "frontend".into(),
            json!({
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"name": "frontend", "namespace": "shop"},
                "spec": {
                    "selector": {"matchLabels": {"app": "frontend"}},
                    "template": {}
                }
            }),
        );
        cluster
    }

    fn add_pod(&mut self, name: &str, app: &str, behaviour: Behaviour) {
        self.pods.insert(name.into(), pod_json(name, app, "Running"));
        self.behaviours.insert(name.into(), behaviour);
    }

    fn last_container(&self, pod: &str) -> String {
        let patches = self.patches.lock().unwrap();
        let (_, patch) = patches.iter().rev().find(|(name, _)| name == pod).unwrap();
        let containers = patch["spec"]["ephemeralContainers"].as_array().unwrap();
        containers.last().unwrap()["name"].as_str().unwrap().to_string()
    }

    fn patched_containers(&self) -> Vec<(String, String)> {
        self.patches
            .lock()
            .unwrap()
            .iter()
            .map(|(pod, patch)| {
                let name = patch["spec"]["ephemeralContainers"][0]["name"].as_str().unwrap();
                (pod.clone(), name.to_string())
            })
            .collect()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_pod(&self, _namespace: &str, name: &str) -> Result<Pod> {
        let value = self.pods.get(name).cloned().ok_or_else(|| not_found("pods", name))?;
        Ok(serde_json::from_value(value)?)
    }

    async fn list_pods(&self, _namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let (key, value) = label_selector.split_once('=').unwrap();
        Ok(self
            .pods
            .values()
            .filter(|pod| pod["metadata"]["labels"][key] == value)
            .map(|pod| serde_json::from_value(pod.clone()).unwrap())
            .collect())
    }

    async fn get_deployment(&self, _namespace: &str, name: &str) -> Result<Deployment> {
        let value = self
            .deployments
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("deployments.apps", name))?;
        Ok(serde_json::from_value(value)?)
    }

    async fn list_deployments(
        &self,
        _namespace: &str,
        _label_selector: &str,
    ) -> Result<Vec<Deployment>> {
        Ok(self
            .deployments
            .values()
            .map(|d| serde_json::from_value(d.clone()).unwrap())
            .collect())
    }

    async fn patch_ephemeral_containers(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Pod> {
        if let Some(Behaviour::Rejected(status)) = self.behaviours.get(name) {
            return Err(Error::Api(status.clone()));
        }
        self.patches
            .lock()
            .unwrap()
            .push((name.to_string(), patch.clone()));
        self.get_pod(namespace, name).await
    }

    async fn watch_pod(
        &self,
        _namespace: &str,
        name: &str,
        resource_version: &str,
    ) -> Result<WatchStream> {
        assert_eq!(resource_version, "100");
        let pod = &self.pods[name];
        let container = self.last_container(name);

        let stream = match &self.behaviours[name] {
            Behaviour::Starts(_) => stream::iter(vec![
                Ok(WatchEvent::Modified(with_container_state(
                    pod,
                    &container,
                    json!({"waiting": {"reason": "ContainerCreating", "message": "pulling image"}}),
                ))),
                Ok(WatchEvent::Modified(with_container_state(
                    pod,
                    &container,
                    json!({"running": {"startedAt": "2024-01-01T00:00:00Z"}}),
                ))),
            ])
            .boxed(),
            Behaviour::Stuck => stream::pending().boxed(),
            Behaviour::PodDeleted => stream::iter(vec![Ok(WatchEvent::Deleted(
                serde_json::from_value(pod.clone()).unwrap(),
            ))])
            .boxed(),
            Behaviour::Rejected(_) => unreachable!("rejected injections are never watched"),
        };
        Ok(stream)
    }

    async fn pod_logs(
        &self,
        _namespace: &str,
        name: &str,
        container: &str,
        since_secs: u64,
    ) -> Result<LogStream> {
        assert_eq!(container, self.last_container(name));
        assert_eq!(since_secs, 60);
        match &self.behaviours[name] {
            Behaviour::Starts(logs) => Ok(Box::pin(std::io::Cursor::new(logs.as_bytes().to_vec()))),
            _ => unreachable!("logs are only read from started containers"),
        }
    }
}

/// Suffixes `t0000`, `t0001`, ...
#[derive(Default)]
struct SequentialNames(AtomicUsize);

impl NameSource for SequentialNames {
    fn suffix(&self) -> String {
        format!("t{:04}", self.0.fetch_add(1, Ordering::SeqCst))
    }
}

fn short_timeouts() -> Timeouts {
    Timeouts {
        watch_secs: 1,
        assert_secs: 1,
        log_since_secs: 60,
    }
}

fn case(description: &str, expect: &str, from: &str) -> String {
    format!(
        r#"
  - description: {description}
    expect: {expect}
    from: {from}
    to:
      address: 10.0.0.5
      port: 80
"#
    )
}

fn suite(cases: &[String]) -> TestSuite {
    let yaml = format!("testCases:{}", cases.concat());
    serde_yaml::from_str(&yaml).unwrap()
}

fn pod(name: &str) -> String {
    format!("{{pod: {{namespace: shop, name: {}}}}}", name)
}

async fn run(cluster: &FakeCluster, suite: &TestSuite) -> SuiteReport {
    let names = SequentialNames::default();
    let timeouts = short_timeouts();
    let cancel = CancellationToken::new();
    let ctx = RunContext {
        cluster,
        names: &names,
        image: "probe:test",
        timeouts: &timeouts,
        cancel: &cancel,
    };
    run_suite(suite, &ctx).await
}

#[tokio::test]
async fn test_reachable_destination_passes() {
    let cluster = FakeCluster::new();
    let report = run(&cluster, &suite(&[case("reach", "Pass", &pod("web-pass"))])).await;

    assert_eq!(report.passed(), 1);
    assert!(report.into_result().is_ok());

    let patches = cluster.patches.lock().unwrap();
    let container = &patches[0].1["spec"]["ephemeralContainers"][0];
    assert_eq!(
        patches[0].1["spec"]["$setElementOrder/ephemeralContainers"],
        json!([{"name": "probe-t0000"}])
    );
    assert_eq!(container["name"], "probe-t0000");
    assert_eq!(container["image"], "probe:test");
    assert_eq!(container["args"], json!(["probe"]));
}

#[tokio::test]
async fn test_refused_destination_fails_when_reachable_expected() {
    let cluster = FakeCluster::new();
    let report = run(&cluster, &suite(&[case("reach", "Pass", &pod("web-refused"))])).await;

    let error = report.results[0].error.as_ref().unwrap();
    assert!(matches!(error, Error::AssertionMismatch(_)));
    assert_eq!(error.to_string(), "could not reach destination");
}

#[tokio::test]
async fn test_refused_destination_passes_when_unreachable_expected() {
    let cluster = FakeCluster::new();
    let report = run(&cluster, &suite(&[case("blocked", "Fail", &pod("web-refused"))])).await;
    assert!(report.into_result().is_ok());
}

#[tokio::test]
async fn test_watch_timeout_does_not_stop_suite() {
    let cluster = FakeCluster::new();
    let report = run(
        &cluster,
        &suite(&[
            case("stuck", "Pass", &pod("web-stuck")),
            case("after", "Pass", &pod("web-pass")),
        ]),
    )
    .await;

    assert!(matches!(report.results[0].error, Some(Error::WatchTimedOut(1))));
    assert!(report.results[1].passed());

    match report.into_result() {
        Err(Error::SuiteFailed(failures)) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].description, "stuck");
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn test_disabled_feature_is_reported() {
    let cluster = FakeCluster::new();
    let report = run(&cluster, &suite(&[case("nofeature", "Pass", &pod("web-nofeature"))])).await;

    let error = report.results[0].error.as_ref().unwrap();
    assert!(matches!(error, Error::FeatureUnavailable(_)));
    assert!(error
        .to_string()
        .contains("the server could not find the requested resource"));
}

#[tokio::test]
async fn test_deleted_pod_is_distinct_from_timeout() {
    let cluster = FakeCluster::new();
    let report = run(&cluster, &suite(&[case("gone", "Pass", &pod("web-gone"))])).await;
    assert!(matches!(
        report.results[0].error,
        Some(Error::WatchDeleted { .. })
    ));
}

#[tokio::test]
async fn test_resolution_failures_continue_and_aggregate() {
    let cluster = FakeCluster::new();
    let report = run(
        &cluster,
        &suite(&[
            case("missing pod", "Pass", &pod("nope")),
            case("missing deployment", "Pass", "{deployment: {namespace: shop, name: nope}}"),
            case("ambiguous", "Pass", "{pod: {namespace: shop}}"),
            case("ok", "Pass", &pod("web-pass")),
        ]),
    )
    .await;

    assert!(matches!(report.results[0].error, Some(Error::TargetNotFound { .. })));
    assert!(matches!(report.results[1].error, Some(Error::TargetNotFound { .. })));
    assert!(matches!(report.results[2].error, Some(Error::InvalidSelector(_))));
    assert!(report.results[3].passed());

    let message = report.into_result().unwrap_err().to_string();
    assert!(message.starts_with("3 test case(s) failed"));
    assert!(message.contains("missing pod: pod 'shop/nope' not found"));
    assert!(message.contains("missing deployment: deployment 'shop/nope' not found"));
}

#[tokio::test]
async fn test_deployment_resolves_to_lowest_running_pod() {
    let cluster = FakeCluster::new();
    let report = run(
        &cluster,
        &suite(&[
            case("by deployment", "Pass", "{deployment: {namespace: shop, name: frontend}}"),
            case(
                "by labels",
                "Pass",
                "{pod: {namespace: shop, labelSelector: {matchLabels: {app: frontend}}}}",
            ),
        ]),
    )
    .await;

    assert!(report.into_result().is_ok());
    assert_eq!(
        cluster.patched_containers(),
        vec![
            ("frontend-a".to_string(), "probe-t0000".to_string()),
            ("frontend-a".to_string(), "probe-t0001".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_cancelled_suite_skips_remaining_cases() {
    let cluster = FakeCluster::new();
    let names = SequentialNames::default();
    let timeouts = short_timeouts();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let ctx = RunContext {
        cluster: &cluster,
        names: &names,
        image: "probe:test",
        timeouts: &timeouts,
        cancel: &cancel,
    };
    let report = run_suite(
        &suite(&[case("a", "Pass", &pod("web-pass")), case("b", "Pass", &pod("web-pass"))]),
        &ctx,
    )
    .await;

    assert!(report.results.is_empty());
    assert_eq!(report.skipped, 2);
    assert!(matches!(report.into_result(), Err(Error::Cancelled)));
}

#[tokio::test]
async fn test_interrupt_during_readiness_wait_ends_case_promptly() {
    let cluster = FakeCluster::new();
    let names = SequentialNames::default();
    let timeouts = Timeouts {
        watch_secs: 30,
        assert_secs: 30,
        log_since_secs: 60,
    };
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let ctx = RunContext {
        cluster: &cluster,
        names: &names,
        image: "probe:test",
        timeouts: &timeouts,
        cancel: &cancel,
    };
    let started = Instant::now();
    let report = run_suite(
        &suite(&[case("stuck", "Pass", &pod("web-stuck")), case("after", "Pass", &pod("web-pass"))]),
        &ctx,
    )
    .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.results.len(), 1);
    assert!(matches!(report.results[0].error, Some(Error::Cancelled)));
    assert_eq!(report.skipped, 1);
    assert!(report.into_result().is_err());
}
