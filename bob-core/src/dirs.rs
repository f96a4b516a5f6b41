//! Remote directory identities
//!
//! `RemoteDir` is the unit copy and delete operations act on, `NodeDisk` is
//! the unit disk restarts are batched by. Both are used as map keys, so
//! equality, hashing and ordering are structural.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::config::Node;

/// A directory on a remote host, identified by (address, path)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemoteDir {
    /// Resolved host address (IP)
    pub address: String,
    /// Absolute path on the host
    pub path: String,
}

impl RemoteDir {
    pub fn new(address: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            path: path.into(),
        }
    }

    /// Child directory, joined with `/` regardless of the local platform
    pub fn join(&self, name: &str) -> Self {
        Self {
            address: self.address.clone(),
            path: join_remote_path(&self.path, name),
        }
    }
}

impl fmt::Display for RemoteDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.path)
    }
}

/// Join two remote path segments with exactly one separator
pub fn join_remote_path(base: &str, name: &str) -> String {
    let base = base.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if base.is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", base, name)
    }
}

/// A disk on a node. Identity is (node name, disk name).
#[derive(Debug, Clone)]
pub struct NodeDisk {
    pub node: Node,
    pub disk_name: String,
}

impl NodeDisk {
    pub fn new(node: Node, disk_name: impl Into<String>) -> Self {
        Self {
            node,
            disk_name: disk_name.into(),
        }
    }

    fn key(&self) -> (&str, &str) {
        (&self.node.name, &self.disk_name)
    }
}

impl PartialEq for NodeDisk {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for NodeDisk {}

impl Hash for NodeDisk {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for NodeDisk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeDisk {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for NodeDisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node.name, self.disk_name)
    }
}

/// The physical location backing one VDisk replica
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplicaDir {
    pub node_disk: NodeDisk,
    pub dir: RemoteDir,
}

impl ReplicaDir {
    pub fn new(node_disk: NodeDisk, dir: RemoteDir) -> Self {
        Self { node_disk, dir }
    }
}
