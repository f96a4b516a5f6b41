//! Topology resolver
//!
//! Maps every (node, disk) of a configuration to the remote directories
//! bob keeps data in: `<disk path>/<root dir name>` for replicas and
//! `<root>/alien` for the staging area.

use bob_core::{BobError, ClusterConfig, Node, RemoteDir, Result, ALIEN_DIR_NAME};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::config::RootDirOverrides;
use crate::node_api::NodeApi;

/// node name -> disk name -> directory
pub type DirsByDiskByNode = HashMap<String, HashMap<String, RemoteDir>>;

pub struct TopologyResolver {
    node_api: Arc<dyn NodeApi>,
    overrides: RootDirOverrides,
}

impl TopologyResolver {
    pub fn new(node_api: Arc<dyn NodeApi>, overrides: RootDirOverrides) -> Self {
        Self {
            node_api,
            overrides,
        }
    }

    /// Root directory of every disk of every node
    #[instrument(skip(self, config), fields(nodes = config.nodes.len()))]
    pub async fn root_dirs(&self, config: &ClusterConfig) -> Result<DirsByDiskByNode> {
        let mut result = HashMap::with_capacity(config.nodes.len());

        for node in &config.nodes {
            let address = resolve_ip(node).await?;
            let root_dir_name = self.root_dir_name(node).await?;

            let dirs = node
                .disks
                .iter()
                .map(|disk| {
                    let dir = RemoteDir::new(address.clone(), disk.path.clone()).join(&root_dir_name);
                    (disk.name.clone(), dir)
                })
                .collect();

            debug!(node = %node.name, address = %address, root = %root_dir_name, "Resolved node");
            result.insert(node.name.clone(), dirs);
        }

        Ok(result)
    }

    /// Alien staging directory of every disk of every node
    pub async fn alien_dirs(&self, config: &ClusterConfig) -> Result<DirsByDiskByNode> {
        let roots = self.root_dirs(config).await?;
        Ok(alien_dirs_from_roots(&roots))
    }

    async fn root_dir_name(&self, node: &Node) -> Result<String> {
        if let Some(name) = self.overrides.get(&node.name) {
            return Ok(name.to_string());
        }
        self.node_api.root_dir_name(node).await
    }
}

pub fn alien_dirs_from_roots(roots: &DirsByDiskByNode) -> DirsByDiskByNode {
    roots
        .iter()
        .map(|(node, disks)| {
            let aliens = disks
                .iter()
                .map(|(disk, root)| (disk.clone(), root.join(ALIEN_DIR_NAME)))
                .collect();
            (node.clone(), aliens)
        })
        .collect()
}

/// Resolve the host of a node address to an IP, preferring IPv4
pub async fn resolve_ip(node: &Node) -> Result<String> {
    let host = node.host();
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip.to_string());
    }

    let addrs: Vec<_> = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| {
            BobError::Configuration(format!(
                "Failed to resolve address {} of node {}: {}",
                node.address, node.name, e
            ))
        })?
        .collect();

    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .map(|a| a.ip().to_string())
        .ok_or_else(|| {
            BobError::Configuration(format!(
                "Address {} of node {} resolved to nothing",
                node.address, node.name
            ))
        })
}
