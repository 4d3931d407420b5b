//! Kubernetes API client
//!
//! `ClusterApi` is the only seam between the probe pipeline and the control
//! plane. `KubeClient` implements it with `kube`; tests substitute an
//! in-memory implementation.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, LogParams, Patch, PatchParams, WatchParams};
use kube::config::KubeConfigOptions;
use kube::core::WatchEvent;
use kube::{Client, Config};
use serde_json::Value;
use tokio::io::{AsyncBufRead, BufReader};
use tokio_util::compat::FuturesAsyncReadCompatExt;

use crate::common::{Error, Result};

/// Notifications for one watched pod, in arrival order
pub type WatchStream = BoxStream<'static, Result<WatchEvent<Pod>>>;

/// Followed container output
pub type LogStream = Pin<Box<dyn AsyncBufRead + Send>>;

/// Operations the probe pipeline needs from the cluster
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment>;

    async fn list_deployments(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Deployment>>;

    /// Apply a strategic merge patch through the `ephemeralcontainers` sub-resource
    async fn patch_ephemeral_containers(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Pod>;

    /// Watch a single pod starting after `resource_version`
    async fn watch_pod(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
    ) -> Result<WatchStream>;

    /// Follow a container's output, starting `since_secs` in the past
    async fn pod_logs(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
        since_secs: u64,
    ) -> Result<LogStream>;
}

/// Client for the Kubernetes API server
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
}

impl KubeClient {
    /// Connect using the kubeconfig context, or the in-cluster environment
    ///
    /// Credentials (tokens, client certificates, exec plugins) are only
    /// exercised on the first request, so the server version is fetched here
    /// to fail before any test case runs.
    pub async fn connect(context: Option<&str>) -> Result<Self> {
        let config = match context {
            Some(context) => {
                let options = KubeConfigOptions {
                    context: Some(context.to_string()),
                    ..Default::default()
                };
                Config::from_kubeconfig(&options).await.map_err(|e| {
                    Error::Config(format!("kubeconfig context '{}': {}", context, e))
                })?
            }
            None => Config::infer()
                .await
                .map_err(|e| Error::Config(format!("cannot load cluster configuration: {}", e)))?,
        };

        let server = config.cluster_url.to_string();
        let client = Self::from_config(config)?;
        let version = client
            .client
            .apiserver_version()
            .await
            .map_err(|e| Error::Connect {
                server: server.clone(),
                reason: e.to_string(),
            })?;
        tracing::debug!(server = %server, version = %version.git_version, "Connected to cluster");
        Ok(client)
    }

    /// Build a client from an explicit configuration, without contacting the server
    pub fn from_config(config: Config) -> Result<Self> {
        Ok(Self {
            client: Client::try_from(config)?,
        })
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeClient {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        Ok(self.pods(namespace).get(name).await?)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let params = ListParams::default().labels(label_selector);
        Ok(self.pods(namespace).list(&params).await?.items)
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        Ok(self.deployments(namespace).get(name).await?)
    }

    async fn list_deployments(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<Deployment>> {
        let params = ListParams::default().labels(label_selector);
        Ok(self.deployments(namespace).list(&params).await?.items)
    }

    async fn patch_ephemeral_containers(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Pod> {
        Ok(self
            .pods(namespace)
            .patch_ephemeral_containers(name, &PatchParams::default(), &Patch::Strategic(patch))
            .await?)
    }

    async fn watch_pod(
        &self,
        namespace: &str,
        name: &str,
        resource_version: &str,
    ) -> Result<WatchStream> {
        let params = WatchParams::default().fields(&format!("metadata.name={}", name));
        let events = self.pods(namespace).watch(&params, resource_version).await?;
        Ok(events.map(|event| event.map_err(Error::from)).boxed())
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        name: &str,
        container: &str,
        since_secs: u64,
    ) -> Result<LogStream> {
        let params = LogParams {
            container: Some(container.to_string()),
            follow: true,
            since_seconds: Some(i64::try_from(since_secs).unwrap_or(i64::MAX)),
            ..Default::default()
        };
        let logs = self.pods(namespace).log_stream(name, &params).await?;
        Ok(Box::pin(BufReader::new(logs.compat())))
    }
}
