//! Cluster state finder
//!
//! Loads the old and new configuration, rejects shrinks, and joins the
//! replica sets of every vdisk into old/new directory lists.

use async_trait::async_trait;
use bob_core::{
    BobError, ClusterConfig, NodeDisk, RemoteDir, ReplicaDir, Result, VDisk,
};
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::resolver::{alien_dirs_from_roots, DirsByDiskByNode, TopologyResolver};

/// Where one vdisk's data used to live and where it must live now
#[derive(Debug, Clone)]
pub struct VDiskInfo {
    pub vdisk: VDisk,
    pub old_dirs: Vec<ReplicaDir>,
    pub new_dirs: Vec<ReplicaDir>,
}

/// Complete planning input
#[derive(Debug, Clone, Default)]
pub struct ClusterState {
    pub vdisks: Vec<VDiskInfo>,
    /// Staging directories that must be empty before migration
    pub alien_dirs: Vec<RemoteDir>,
}

/// Source of the old and new cluster configuration
#[async_trait]
pub trait ConfigurationSource: Send + Sync {
    async fn old_config(&self) -> Result<ClusterConfig>;
    async fn new_config(&self) -> Result<ClusterConfig>;
}

/// Reads both configurations from files
pub struct FileConfigurationSource {
    old_path: PathBuf,
    new_path: PathBuf,
}

impl FileConfigurationSource {
    pub fn new(old_path: impl Into<PathBuf>, new_path: impl Into<PathBuf>) -> Self {
        Self {
            old_path: old_path.into(),
            new_path: new_path.into(),
        }
    }
}

#[async_trait]
impl ConfigurationSource for FileConfigurationSource {
    async fn old_config(&self) -> Result<ClusterConfig> {
        ClusterConfig::from_file(&self.old_path)
    }

    async fn new_config(&self) -> Result<ClusterConfig> {
        ClusterConfig::from_file(&self.new_path)
    }
}

/// In-memory configurations, used by tests and tooling that already holds them
pub struct StaticConfigurationSource {
    old: ClusterConfig,
    new: ClusterConfig,
}

impl StaticConfigurationSource {
    pub fn new(old: ClusterConfig, new: ClusterConfig) -> Self {
        Self { old, new }
    }
}

#[async_trait]
impl ConfigurationSource for StaticConfigurationSource {
    async fn old_config(&self) -> Result<ClusterConfig> {
        Ok(self.old.clone())
    }

    async fn new_config(&self) -> Result<ClusterConfig> {
        Ok(self.new.clone())
    }
}

pub struct ClusterStateFinder {
    source: Arc<dyn ConfigurationSource>,
    resolver: TopologyResolver,
}

impl ClusterStateFinder {
    pub fn new(source: Arc<dyn ConfigurationSource>, resolver: TopologyResolver) -> Self {
        Self { source, resolver }
    }

    #[instrument(skip(self, cancel))]
    pub async fn find(&self, cancel: &CancellationToken) -> Result<ClusterState> {
        let old = self.source.old_config().await?;
        let new = self.source.new_config().await?;

        ensure_no_shrink(&old, &new)?;

        if cancel.is_cancelled() {
            return Err(BobError::Cancelled);
        }

        let old_roots = self.resolver.root_dirs(&old).await?;
        let new_roots = self.resolver.root_dirs(&new).await?;

        let state = build_cluster_state(&old, &new, &old_roots, &new_roots)?;

        info!(
            vdisks = state.vdisks.len(),
            alien_dirs = state.alien_dirs.len(),
            "Cluster state found"
        );

        Ok(state)
    }
}

/// Every vdisk of the old configuration must survive in the new one
pub fn ensure_no_shrink(old: &ClusterConfig, new: &ClusterConfig) -> Result<()> {
    let new_ids: HashSet<u32> = new.vdisks.iter().map(|v| v.id).collect();
    let mut missing: Vec<u32> = old
        .vdisks
        .iter()
        .map(|v| v.id)
        .filter(|id| !new_ids.contains(id))
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    missing.sort_unstable();
    Err(BobError::Shrink { vdisk_ids: missing })
}

/// Join both configurations on vdisk id
pub fn build_cluster_state(
    old: &ClusterConfig,
    new: &ClusterConfig,
    old_roots: &DirsByDiskByNode,
    new_roots: &DirsByDiskByNode,
) -> Result<ClusterState> {
    let mut new_vdisks: Vec<&VDisk> = new.vdisks.iter().collect();
    new_vdisks.sort_by_key(|v| v.id);

    let mut vdisks = Vec::with_capacity(new_vdisks.len());
    for vdisk in new_vdisks {
        let old_dirs = match old.vdisk(vdisk.id) {
            Some(old_vdisk) => replica_dirs(old, old_vdisk, old_roots)?,
            None => {
                debug!(vdisk = vdisk.id, "New vdisk, nothing to copy");
                Vec::new()
            }
        };
        let new_dirs = replica_dirs(new, vdisk, new_roots)?;

        vdisks.push(VDiskInfo {
            vdisk: vdisk.clone(),
            old_dirs,
            new_dirs,
        });
    }

    let alien_dirs: BTreeSet<RemoteDir> = [old_roots, new_roots]
        .into_iter()
        .flat_map(|roots| {
            alien_dirs_from_roots(roots)
                .into_values()
                .flat_map(|disks| disks.into_values())
        })
        .collect();

    Ok(ClusterState {
        vdisks,
        alien_dirs: alien_dirs.into_iter().collect(),
    })
}

fn replica_dirs(
    config: &ClusterConfig,
    vdisk: &VDisk,
    roots: &DirsByDiskByNode,
) -> Result<Vec<ReplicaDir>> {
    let mut dirs = Vec::with_capacity(vdisk.replicas.len());

    for replica in &vdisk.replicas {
        let node = config.node(&replica.node).ok_or_else(|| {
            BobError::ClusterState(format!(
                "Vdisk {} references unknown node {}",
                vdisk.id, replica.node
            ))
        })?;

        if node.disk(&replica.disk).is_none() {
            return Err(BobError::ClusterState(format!(
                "Vdisk {} references disk {} which node {} does not have",
                vdisk.id, replica.disk, node.name
            )));
        }

        let root = roots
            .get(&node.name)
            .and_then(|disks| disks.get(&replica.disk))
            .ok_or_else(|| {
                BobError::ClusterState(format!(
                    "No root directory resolved for {}/{}",
                    node.name, replica.disk
                ))
            })?;

        let dir = ReplicaDir::new(
            NodeDisk::new(node.clone(), replica.disk.clone()),
            root.join(&vdisk.id.to_string()),
        );

        if dirs.iter().any(|d: &ReplicaDir| d.dir == dir.dir) {
            warn!(vdisk = vdisk.id, dir = %dir.dir, "Duplicate replica directory");
            continue;
        }
        dirs.push(dir);
    }

    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RootDirOverrides;
    use crate::node_api::SimulatedNodeApi;
    use bob_core::{Disk, Node, Replica};

    fn node(name: &str, ip: &str) -> Node {
        Node {
            name: name.to_string(),
            address: format!("{}:20000", ip),
            disks: vec![Disk {
                name: "disk1".to_string(),
                path: "/mnt/disk1".to_string(),
            }],
        }
    }

    fn vdisk(id: u32, replicas: &[&str]) -> VDisk {
        VDisk {
            id,
            replicas: replicas
                .iter()
                .map(|n| Replica {
                    node: n.to_string(),
                    disk: "disk1".to_string(),
                })
                .collect(),
        }
    }

    fn cluster(vdisks: Vec<VDisk>) -> ClusterConfig {
        ClusterConfig {
            nodes: vec![node("a", "10.0.0.1"), node("b", "10.0.0.2")],
            vdisks,
        }
    }

    fn finder(old: ClusterConfig, new: ClusterConfig) -> ClusterStateFinder {
        ClusterStateFinder::new(
            Arc::new(StaticConfigurationSource::new(old, new)),
            TopologyResolver::new(
                Arc::new(SimulatedNodeApi::new("bob")),
                RootDirOverrides::default(),
            ),
        )
    }

    #[tokio::test]
    async fn test_find_joins_vdisks() {
        let old = cluster(vec![vdisk(1, &["a"])]);
        let new = cluster(vec![vdisk(1, &["a", "b"]), vdisk(2, &["b"])]);

        let state = finder(old, new)
            .find(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(state.vdisks.len(), 2);
        let first = &state.vdisks[0];
        assert_eq!(first.vdisk.id, 1);
        assert_eq!(first.old_dirs.len(), 1);
        assert_eq!(first.new_dirs.len(), 2);
        assert_eq!(first.old_dirs[0].dir, RemoteDir::new("10.0.0.1", "/mnt/disk1/bob/1"));
        assert_eq!(first.new_dirs[1].node_disk.node.name, "b");

        let second = &state.vdisks[1];
        assert!(second.old_dirs.is_empty());

        assert_eq!(
            state.alien_dirs,
            vec![
                RemoteDir::new("10.0.0.1", "/mnt/disk1/bob/alien"),
                RemoteDir::new("10.0.0.2", "/mnt/disk1/bob/alien"),
            ]
        );
    }

    #[tokio::test]
    async fn test_find_rejects_shrink() {
        let old = cluster(vec![vdisk(1, &["a"]), vdisk(9, &["b"])]);
        let new = cluster(vec![vdisk(1, &["a"])]);

        let err = finder(old, new)
            .find(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BobError::Shrink { ref vdisk_ids } if vdisk_ids == &vec![9]));
        assert!(err.to_string().contains('9'));
    }

    #[tokio::test]
    async fn test_find_rejects_unknown_disk() {
        let old = cluster(vec![vdisk(1, &["a"])]);
        let mut new = cluster(vec![vdisk(1, &["a"])]);
        new.vdisks[0].replicas[0].disk = "disk7".to_string();

        let err = finder(old, new)
            .find(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BobError::ClusterState(_)));
        assert!(err.to_string().contains("disk7"));
    }

    #[tokio::test]
    async fn test_find_rejects_unknown_node() {
        let old = cluster(vec![vdisk(1, &["zzz"])]);
        let new = cluster(vec![vdisk(1, &["a"])]);

        let err = finder(old, new)
            .find(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BobError::ClusterState(_)));
    }

    #[test]
    fn test_ensure_no_shrink_allows_growth() {
        let old = cluster(vec![vdisk(1, &["a"])]);
        let new = cluster(vec![vdisk(1, &["a"]), vdisk(2, &["b"])]);
        assert!(ensure_no_shrink(&old, &new).is_ok());
    }
}
