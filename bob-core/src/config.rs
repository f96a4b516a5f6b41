//! Cluster configuration model
//!
//! Old and new cluster configurations share one schema:
//!
//! ```toml
//! [[nodes]]
//! name = "node1"
//! address = "10.0.0.1:20000"
//! disks = [{ name = "disk1", path = "/mnt/disk1" }]
//!
//! [[vdisks]]
//! id = 1
//! replicas = [{ node = "node1", disk = "disk1" }]
//! ```
//!
//! Files ending in `.json` are read as JSON, everything else as TOML.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{BobError, Result};

/// A physical disk exposed by a node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Disk {
    pub name: String,
    pub path: String,
}

/// A storage node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    /// Unique node name
    pub name: String,
    /// Network address, `host[:port]`
    pub address: String,
    #[serde(default)]
    pub disks: Vec<Disk>,
}

impl Node {
    /// Find a disk by name
    pub fn disk(&self, name: &str) -> Option<&Disk> {
        self.disks.iter().find(|d| d.name == name)
    }

    /// Host part of the node address
    pub fn host(&self) -> &str {
        split_host(&self.address)
    }
}

/// Placement of one VDisk replica
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Replica {
    pub node: String,
    pub disk: String,
}

/// A logical shard replicated over a set of (node, disk) pairs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VDisk {
    pub id: u32,
    #[serde(default)]
    pub replicas: Vec<Replica>,
}

/// Complete cluster configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub vdisks: Vec<VDisk>,
}

impl ClusterConfig {
    /// Load configuration from a TOML or JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BobError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let config = if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
        .map_err(|e| {
            BobError::Configuration(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Reject duplicated keys
    pub fn validate(&self) -> Result<()> {
        let mut node_names = HashSet::new();
        for node in &self.nodes {
            if node.name.is_empty() {
                return Err(BobError::Configuration("Node with empty name".to_string()));
            }
            if !node_names.insert(node.name.as_str()) {
                return Err(BobError::Configuration(format!(
                    "Duplicate node name: {}",
                    node.name
                )));
            }

            let mut disk_names = HashSet::new();
            for disk in &node.disks {
                if !disk_names.insert(disk.name.as_str()) {
                    return Err(BobError::Configuration(format!(
                        "Duplicate disk {} on node {}",
                        disk.name, node.name
                    )));
                }
            }
        }

        let mut vdisk_ids = HashSet::new();
        for vdisk in &self.vdisks {
            if !vdisk_ids.insert(vdisk.id) {
                return Err(BobError::Configuration(format!(
                    "Duplicate vdisk id: {}",
                    vdisk.id
                )));
            }
        }

        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn vdisk(&self, id: u32) -> Option<&VDisk> {
        self.vdisks.iter().find(|v| v.id == id)
    }
}

/// Strip the port from `host[:port]`, handling bracketed IPv6 literals
pub fn split_host(address: &str) -> &str {
    if let Some(rest) = address.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match address.rsplit_once(':') {
        // a bare IPv6 literal has more than one colon
        Some((host, _)) if !host.contains(':') => host,
        _ => address,
    }
}
