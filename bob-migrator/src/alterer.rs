//! Cluster state alterer
//!
//! Orchestrates one migration run:
//! 1. Find the cluster state from both configurations
//! 2. Check alien directories are empty
//! 3. Plan copies and deletions
//! 4. Copy
//! 5. Remove unused replicas (confirmed, then unconfirmed), when enabled
//! 6. Restart disks that received data
//!
//! Steps 1 to 3 run for real in dry-run mode. Nothing is mutated before all
//! of them succeed.

use bob_core::{BobError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config::MigratorConfig;
use crate::copier::{CopyReport, Copier};
use crate::node_api::NodeApi;
use crate::planner::{WorkSpecification, WorkSpecificationFinder};
use crate::remote::RemoteFileClient;
use crate::remover::{RemovalReport, Remover};
use crate::resolver::TopologyResolver;
use crate::restarter::{DiskRestarter, RestartReport};
use crate::state::{ClusterStateFinder, ConfigurationSource};
use crate::validator::ClusterStateValidator;

/// Outcome of a migration run
#[derive(Debug, Default)]
pub struct AlterReport {
    pub plan: WorkSpecification,
    pub copy: CopyReport,
    /// `None` when removal was disabled or the run stopped before it
    pub confirmed_removal: Option<RemovalReport>,
    pub unconfirmed_removal: Option<RemovalReport>,
    pub restart: RestartReport,
    /// Why removal did not run even though it was requested
    pub removal_aborted: Option<String>,
    pub dry_run: bool,
    pub duration: Duration,
}

impl AlterReport {
    pub fn is_success(&self) -> bool {
        self.copy.is_success()
            && self.removal_aborted.is_none()
            && self.confirmed_removal.as_ref().map_or(true, |r| r.is_success())
            && self.unconfirmed_removal.as_ref().map_or(true, |r| r.is_success())
            && self.restart.is_success()
    }

    pub fn summary(&self) -> String {
        let removal = |report: &Option<RemovalReport>| match report {
            Some(r) => r.summary(),
            None => "not run".to_string(),
        };

        format!(
            "Plan: {}\nCopy: {}\nConfirmed removal: {}\nUnconfirmed removal: {}\nRestart: {}\nResult: {} in {:?}",
            self.plan.summary(),
            self.copy.summary(),
            removal(&self.confirmed_removal),
            removal(&self.unconfirmed_removal),
            self.restart.summary(),
            if self.is_success() { "success" } else { "failure" },
            self.duration
        )
    }
}

pub struct ClusterStateAlterer {
    finder: ClusterStateFinder,
    validator: ClusterStateValidator,
    copier: Copier,
    remover: Remover,
    restarter: DiskRestarter,
    dry_run: bool,
    remove_unused_replicas: bool,
    copy_parallel_degree: usize,
    continue_on_error: bool,
}

impl ClusterStateAlterer {
    pub fn new(
        config: &MigratorConfig,
        source: Arc<dyn ConfigurationSource>,
        node_api: Arc<dyn NodeApi>,
        remote: Arc<dyn RemoteFileClient>,
    ) -> Self {
        let resolver = TopologyResolver::new(node_api.clone(), config.root_dir_overrides.clone());

        Self {
            finder: ClusterStateFinder::new(source, resolver),
            validator: ClusterStateValidator::new(remote.clone(), !config.skip_alien_check),
            copier: Copier::new(remote.clone(), config.dry_run, config.continue_on_error),
            remover: Remover::new(
                remote,
                config.copy_parallel_degree,
                config.dry_run,
                config.force_remove_without_copies,
            ),
            restarter: DiskRestarter::new(node_api, config.dry_run, config.continue_on_error),
            dry_run: config.dry_run,
            remove_unused_replicas: config.remove_unused_replicas,
            copy_parallel_degree: config.copy_parallel_degree,
            continue_on_error: config.continue_on_error,
        }
    }

    /// Run the migration.
    ///
    /// Errors are fatal problems found before anything was mutated, or
    /// cancellation. Failures of individual operations are in the report.
    #[instrument(skip(self, cancel), fields(dry_run = self.dry_run))]
    pub async fn alter(&self, cancel: &CancellationToken) -> Result<AlterReport> {
        let start = Instant::now();

        let state = self.finder.find(cancel).await?;
        self.validator.validate(&state, cancel).await?;

        let plan = WorkSpecificationFinder::find(&state);
        info!(plan = %plan, "Work specification ready");

        let mut report = AlterReport {
            dry_run: self.dry_run,
            ..Default::default()
        };

        if plan.is_empty() {
            info!("Cluster already matches the target configuration");
            report.plan = plan;
            report.duration = start.elapsed();
            return Ok(report);
        }

        ensure_not_cancelled(cancel)?;
        report.copy = self
            .copier
            .copy(&plan.copy_operations, self.copy_parallel_degree, cancel)
            .await;
        ensure_not_cancelled(cancel)?;

        if !self.remove_unused_replicas {
            info!(
                confirmed = plan.confirmed_delete_operations.len(),
                unconfirmed = plan.unconfirmed_delete_operations.len(),
                "Removal of unused replicas disabled"
            );
        } else if !report.copy.is_success() && !self.continue_on_error {
            let reason = format!("{} copies failed", report.copy.failed.len());
            warn!(reason = %reason, "Skipping removal of unused replicas");
            report.removal_aborted = Some(reason);
        } else {
            report.confirmed_removal = Some(
                self.remover
                    .remove_confirmed(&plan.confirmed_delete_operations, cancel)
                    .await,
            );
            ensure_not_cancelled(cancel)?;
            report.unconfirmed_removal = Some(
                self.remover
                    .remove_unconfirmed(&plan.unconfirmed_delete_operations, cancel)
                    .await,
            );
            ensure_not_cancelled(cancel)?;
        }

        let failed_copies: Vec<_> = report
            .copy
            .failed
            .iter()
            .map(|f| f.operation.clone())
            .collect();
        let copied = if self.dry_run {
            &plan.copy_operations
        } else {
            &report.copy.succeeded
        };
        report.restart = self.restarter.restart(copied, &failed_copies, cancel).await;

        report.plan = plan;
        report.duration = start.elapsed();

        if report.is_success() {
            info!(duration = ?report.duration, "Migration complete");
        } else {
            error!(duration = ?report.duration, "Migration finished with failures");
        }

        Ok(report)
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(BobError::Cancelled);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_api::SimulatedNodeApi;
    use crate::remote::SimulatedRemoteFileClient;
    use crate::state::StaticConfigurationSource;
    use bob_core::{ClusterConfig, Disk, Node, Replica, VDisk};

    fn cluster(replicas: &[&str]) -> ClusterConfig {
        let node = |name: &str, ip: &str| Node {
            name: name.to_string(),
            address: format!("{}:20000", ip),
            disks: vec![Disk {
                name: "disk1".to_string(),
                path: "/mnt/disk1".to_string(),
            }],
        };

        ClusterConfig {
            nodes: vec![node("a", "10.0.0.1"), node("b", "10.0.0.2")],
            vdisks: vec![VDisk {
                id: 1,
                replicas: replicas
                    .iter()
                    .map(|n| Replica {
                        node: n.to_string(),
                        disk: "disk1".to_string(),
                    })
                    .collect(),
            }],
        }
    }

    fn alterer(config: &MigratorConfig, old: ClusterConfig, new: ClusterConfig) -> ClusterStateAlterer {
        ClusterStateAlterer::new(
            config,
            Arc::new(StaticConfigurationSource::new(old, new)),
            Arc::new(SimulatedNodeApi::default()),
            Arc::new(SimulatedRemoteFileClient),
        )
    }

    #[tokio::test]
    async fn test_alter_no_changes() {
        let config = MigratorConfig::default();
        let report = alterer(&config, cluster(&["a"]), cluster(&["a"]))
            .alter(&CancellationToken::new())
            .await
            .unwrap();

        assert!(report.plan.is_empty());
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_alter_dry_run_reports_plan() {
        let config = MigratorConfig {
            dry_run: true,
            remove_unused_replicas: true,
            ..Default::default()
        };
        let report = alterer(&config, cluster(&["a"]), cluster(&["b"]))
            .alter(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.plan.copy_operations.len(), 1);
        assert_eq!(report.plan.confirmed_delete_operations.len(), 1);
        assert!(report.copy.dry_run);
        assert_eq!(report.restart.restarted.len(), 1);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_alter_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let config = MigratorConfig::default();
        let err = alterer(&config, cluster(&["a"]), cluster(&["b"]))
            .alter(&cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, BobError::Cancelled));
    }

    #[test]
    fn test_summary_mentions_each_phase() {
        let report = AlterReport::default();
        let summary = report.summary();
        assert!(summary.contains("Plan:"));
        assert!(summary.contains("Restart:"));
        assert!(summary.contains("success"));
    }
}
