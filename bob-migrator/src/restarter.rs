//! Disk restart after copying
//!
//! A node only notices replica data copied into its disk after the disk is
//! restarted. Each affected disk is restarted once, and only when every copy
//! into it succeeded.

use bob_core::{BobError, NodeDisk};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::node_api::NodeApi;
use crate::planner::CopyOperation;

#[derive(Debug, Clone)]
pub struct FailedRestart {
    pub node_disk: NodeDisk,
    pub error: BobError,
}

#[derive(Debug, Default)]
pub struct RestartReport {
    pub restarted: Vec<NodeDisk>,
    pub failed: Vec<FailedRestart>,
    /// Not restarted: a copy into the disk failed, or the phase stopped early
    pub skipped: Vec<NodeDisk>,
    pub dry_run: bool,
}

impl RestartReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} disks restarted, {} failed, {} skipped{}",
            self.restarted.len(),
            self.failed.len(),
            self.skipped.len(),
            if self.dry_run { " (dry run)" } else { "" }
        )
    }
}

pub struct DiskRestarter {
    node_api: Arc<dyn NodeApi>,
    dry_run: bool,
    continue_on_error: bool,
}

impl DiskRestarter {
    pub fn new(node_api: Arc<dyn NodeApi>, dry_run: bool, continue_on_error: bool) -> Self {
        Self {
            node_api,
            dry_run,
            continue_on_error,
        }
    }

    /// Restart the disks `copied` wrote into, except those any of
    /// `failed_copies` also targeted
    #[instrument(skip_all, fields(copied = copied.len(), failed = failed_copies.len()))]
    pub async fn restart(
        &self,
        copied: &[CopyOperation],
        failed_copies: &[CopyOperation],
        cancel: &CancellationToken,
    ) -> RestartReport {
        let mut report = RestartReport {
            dry_run: self.dry_run,
            ..Default::default()
        };

        let incomplete: BTreeSet<&NodeDisk> = failed_copies
            .iter()
            .flat_map(|op| op.affected_new_node_disks.iter())
            .collect();
        let affected: BTreeSet<&NodeDisk> = copied
            .iter()
            .flat_map(|op| op.affected_new_node_disks.iter())
            .collect();

        let mut pending = Vec::new();
        for node_disk in affected {
            if incomplete.contains(node_disk) {
                warn!(disk = %node_disk, "Not restarting disk with failed copies");
                report.skipped.push(node_disk.clone());
            } else {
                pending.push(node_disk.clone());
            }
        }

        let mut pending = pending.into_iter();
        while let Some(node_disk) = pending.next() {
            if self.dry_run {
                info!(disk = %node_disk, "Would restart disk");
                report.restarted.push(node_disk);
                continue;
            }

            if cancel.is_cancelled() {
                report.skipped.push(node_disk);
                report.skipped.extend(pending.by_ref());
                break;
            }

            match self
                .node_api
                .restart_disk(&node_disk.node, &node_disk.disk_name, cancel)
                .await
            {
                Ok(()) => {
                    info!(disk = %node_disk, "Disk restarted");
                    report.restarted.push(node_disk);
                }
                Err(error) => {
                    error!(disk = %node_disk, error = %error, "Disk restart failed");
                    report.failed.push(FailedRestart { node_disk, error });
                    if !self.continue_on_error {
                        report.skipped.extend(pending.by_ref());
                        break;
                    }
                }
            }
        }

        info!(summary = %report.summary(), "Restart phase complete");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bob_core::{Disk, Node, RemoteDir, Result};
    use parking_lot::Mutex;

    /// Records restarts and fails those of `fail_disk`
    #[derive(Default)]
    struct RecordingApi {
        restarts: Mutex<Vec<String>>,
        fail_disk: Option<&'static str>,
    }

    #[async_trait]
    impl NodeApi for RecordingApi {
        async fn root_dir_name(&self, _: &Node) -> Result<String> {
            Ok("bob".to_string())
        }

        async fn restart_disk(&self, node: &Node, disk: &str, _: &CancellationToken) -> Result<()> {
            if self.fail_disk == Some(disk) {
                return Err(BobError::Operation("connection refused".to_string()));
            }
            self.restarts.lock().push(format!("{}/{}", node.name, disk));
            Ok(())
        }
    }

    fn node_disk(node: &str, disk: &str) -> NodeDisk {
        NodeDisk::new(
            Node {
                name: node.to_string(),
                address: "10.0.0.1:20000".to_string(),
                disks: vec![Disk {
                    name: disk.to_string(),
                    path: format!("/mnt/{}", disk),
                }],
            },
            disk,
        )
    }

    fn copy_into(disks: &[(&str, &str)]) -> CopyOperation {
        CopyOperation {
            from: RemoteDir::new("10.0.0.9", "/mnt/disk1/bob/1"),
            to: RemoteDir::new("10.0.0.1", "/mnt/disk1/bob/1"),
            affected_new_node_disks: disks.iter().map(|(n, d)| node_disk(n, d)).collect(),
        }
    }

    #[tokio::test]
    async fn test_restart_each_disk_once() {
        let api = Arc::new(RecordingApi::default());
        let restarter = DiskRestarter::new(api.clone(), false, false);
        let copied = vec![
            copy_into(&[("b", "disk1")]),
            copy_into(&[("b", "disk1"), ("a", "disk2")]),
        ];

        let report = restarter.restart(&copied, &[], &CancellationToken::new()).await;

        assert!(report.is_success());
        assert_eq!(*api.restarts.lock(), vec!["a/disk2", "b/disk1"]);
    }

    #[tokio::test]
    async fn test_restart_skips_disks_with_failed_copies() {
        let api = Arc::new(RecordingApi::default());
        let restarter = DiskRestarter::new(api.clone(), false, false);

        let report = restarter
            .restart(
                &[copy_into(&[("a", "disk1"), ("b", "disk1")])],
                &[copy_into(&[("b", "disk1")])],
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(*api.restarts.lock(), vec!["a/disk1"]);
        assert_eq!(report.skipped, vec![node_disk("b", "disk1")]);
    }

    #[tokio::test]
    async fn test_restart_failure_stops_without_continue() {
        let api = Arc::new(RecordingApi {
            fail_disk: Some("disk1"),
            ..Default::default()
        });
        let copied = vec![copy_into(&[("a", "disk1"), ("a", "disk2")])];

        let report = DiskRestarter::new(api.clone(), false, false)
            .restart(&copied, &[], &CancellationToken::new())
            .await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert!(api.restarts.lock().is_empty());

        let report = DiskRestarter::new(api.clone(), false, true)
            .restart(&copied, &[], &CancellationToken::new())
            .await;
        assert_eq!(report.failed.len(), 1);
        assert_eq!(*api.restarts.lock(), vec!["a/disk2"]);
    }

    #[tokio::test]
    async fn test_restart_dry_run() {
        let api = Arc::new(RecordingApi::default());
        let report = DiskRestarter::new(api.clone(), true, false)
            .restart(&[copy_into(&[("a", "disk1")])], &[], &CancellationToken::new())
            .await;

        assert_eq!(report.restarted.len(), 1);
        assert!(report.summary().contains("dry run"));
        assert!(api.restarts.lock().is_empty());
    }
}
