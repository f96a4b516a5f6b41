//! Node control API client
//!
//! Talks to the HTTP API every bob node exposes: the node configuration
//! (root directory name) and disk stop/start.

use async_trait::async_trait;
use bob_core::{BobError, Node, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Control operations on a running node
#[async_trait]
pub trait NodeApi: Send + Sync {
    /// Name of the directory bob keeps its data in, relative to each disk
    async fn root_dir_name(&self, node: &Node) -> Result<String>;

    /// Restart a disk so it picks up data copied into it
    async fn restart_disk(&self, node: &Node, disk: &str, cancel: &CancellationToken)
        -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct NodeConfigurationResponse {
    root_dir_name: String,
}

/// HTTP implementation of the node API
pub struct HttpNodeApi {
    client: Client,
    port: u16,
}

impl HttpNodeApi {
    pub fn new(port: u16, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BobError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, port })
    }

    fn base_url(&self, node: &Node) -> String {
        let host = node.host();
        if host.contains(':') {
            format!("http://[{}]:{}", host, self.port)
        } else {
            format!("http://{}:{}", host, self.port)
        }
    }

    async fn post_disk_action(&self, node: &Node, disk: &str, action: &str) -> Result<()> {
        let url = format!("{}/disks/{}/{}", self.base_url(node), disk, action);
        debug!(url = %url, "Sending disk action");

        let response = self.client.post(&url).send().await.map_err(|e| {
            BobError::Operation(format!("{} of {}/{} failed: {}", action, node.name, disk, e))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BobError::Operation(format!(
                "{} of {}/{} returned {}: {}",
                action, node.name, disk, status, body
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl NodeApi for HttpNodeApi {
    #[instrument(skip(self, node), fields(node = %node.name))]
    async fn root_dir_name(&self, node: &Node) -> Result<String> {
        let url = format!("{}/configuration", self.base_url(node));

        let response = self.client.get(&url).send().await.map_err(|e| {
            BobError::ClusterState(format!(
                "Failed to query configuration of node {}: {}",
                node.name, e
            ))
        })?;

        if !response.status().is_success() {
            return Err(BobError::ClusterState(format!(
                "Configuration request to node {} returned {}",
                node.name,
                response.status()
            )));
        }

        let body: NodeConfigurationResponse = response.json().await.map_err(|e| {
            BobError::ClusterState(format!(
                "Invalid configuration response from node {}: {}",
                node.name, e
            ))
        })?;

        Ok(body.root_dir_name)
    }

    #[instrument(skip(self, node, cancel), fields(node = %node.name))]
    async fn restart_disk(
        &self,
        node: &Node,
        disk: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let restart = async {
            self.post_disk_action(node, disk, "stop").await?;
            self.post_disk_action(node, disk, "start").await
        };

        tokio::select! {
            result = restart => result?,
            _ = cancel.cancelled() => return Err(BobError::Cancelled),
        }

        info!(node = %node.name, disk = %disk, "Disk restarted");
        Ok(())
    }
}

/// Log-only node API for test mode
pub struct SimulatedNodeApi {
    root_dir_name: String,
}

impl SimulatedNodeApi {
    pub fn new(root_dir_name: impl Into<String>) -> Self {
        Self {
            root_dir_name: root_dir_name.into(),
        }
    }
}

impl Default for SimulatedNodeApi {
    fn default() -> Self {
        Self::new("bob")
    }
}

#[async_trait]
impl NodeApi for SimulatedNodeApi {
    async fn root_dir_name(&self, node: &Node) -> Result<String> {
        debug!(node = %node.name, root = %self.root_dir_name, "Simulated root dir query");
        Ok(self.root_dir_name.clone())
    }

    async fn restart_disk(
        &self,
        node: &Node,
        disk: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(BobError::Cancelled);
        }
        info!(node = %node.name, disk = %disk, "Would restart disk");
        Ok(())
    }
}
