//! Bob Core Library
//!
//! Shared building blocks for bob cluster tooling:
//! - Cluster configuration model (nodes, disks, vdisks, replicas)
//! - Remote directory identities used by migration planning
//! - Common error handling

pub mod config;
pub mod dirs;
pub mod error;

pub use config::{ClusterConfig, Disk, Node, Replica, VDisk};
pub use dirs::{join_remote_path, NodeDisk, RemoteDir, ReplicaDir};
pub use error::{BobError, Result};

/// Name of the per-disk staging directory for not yet placed data
pub const ALIEN_DIR_NAME: &str = "alien";

/// Default port of the node HTTP API
pub const DEFAULT_API_PORT: u16 = 8000;
