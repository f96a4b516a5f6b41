//! Removal of unused replica directories
//!
//! Confirmed deletions go ahead only after every copy made from the
//! directory has been verified. Unconfirmed deletions have no copy to check
//! against and need an explicit force flag.

use bob_core::{BobError, RemoteDir, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::planner::{ConfirmedDeleteOperation, UnconfirmedDeleteOperation};
use crate::processor::{EndpointOperation, ParallelEndpointProcessor};
use crate::remote::RemoteFileClient;

/// A directory that was not removed, and why
#[derive(Debug, Clone)]
pub struct FailedRemoval {
    pub dir: RemoteDir,
    pub error: BobError,
}

/// Outcome of one removal batch
#[derive(Debug, Default)]
pub struct RemovalReport {
    pub planned: usize,
    pub removed: Vec<RemoteDir>,
    pub failed: Vec<FailedRemoval>,
    /// Left in place without an attempt
    pub skipped: Vec<RemoteDir>,
    pub dry_run: bool,
}

impl RemovalReport {
    /// Skipped directories do not count as failures
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn verification_failures(&self) -> usize {
        self.failed.iter().filter(|f| f.error.is_verification()).count()
    }

    pub fn summary(&self) -> String {
        if self.dry_run {
            return format!("{} removals planned (dry run)", self.planned);
        }
        format!(
            "{} removed, {} failed ({} unverified), {} skipped",
            self.removed.len(),
            self.failed.len(),
            self.verification_failures(),
            self.skipped.len()
        )
    }

    fn collect(&mut self, dirs: Vec<RemoteDir>, results: Vec<Result<()>>) {
        for (dir, result) in dirs.into_iter().zip(results) {
            match result {
                Ok(()) => self.removed.push(dir),
                Err(error) => self.failed.push(FailedRemoval { dir, error }),
            }
        }
    }
}

pub struct Remover {
    remote: Arc<dyn RemoteFileClient>,
    parallel_degree: usize,
    dry_run: bool,
    force_unconfirmed: bool,
}

impl Remover {
    pub fn new(
        remote: Arc<dyn RemoteFileClient>,
        parallel_degree: usize,
        dry_run: bool,
        force_unconfirmed: bool,
    ) -> Self {
        Self {
            remote,
            parallel_degree,
            dry_run,
            force_unconfirmed,
        }
    }

    #[instrument(skip(self, operations, cancel), fields(operations = operations.len()))]
    pub async fn remove_confirmed(
        &self,
        operations: &[ConfirmedDeleteOperation],
        cancel: &CancellationToken,
    ) -> RemovalReport {
        let mut report = RemovalReport {
            planned: operations.len(),
            dry_run: self.dry_run,
            ..Default::default()
        };

        if self.dry_run {
            for op in operations {
                let copies: Vec<String> = op.copies.iter().map(|c| c.to_string()).collect();
                info!(dir = %op.dir_to_delete, copies = ?copies, "Would remove after verifying copies");
            }
            return report;
        }

        let endpoint_ops = operations
            .iter()
            .map(|op| {
                let address = op.dir_to_delete.address.clone();
                EndpointOperation::new(address.clone(), address, op.clone())
            })
            .collect();

        let results = ParallelEndpointProcessor::invoke(
            self.parallel_degree,
            endpoint_ops,
            |op: ConfirmedDeleteOperation, token: CancellationToken| {
                let remote = self.remote.clone();
                async move {
                    let result = verify_and_remove(remote.as_ref(), &op, &token).await;
                    match &result {
                        Ok(()) => info!(dir = %op.dir_to_delete, "Removed"),
                        Err(e) => error!(dir = %op.dir_to_delete, error = %e, "Not removed"),
                    }
                    result
                }
            },
            cancel,
        )
        .await;

        report.collect(
            operations.iter().map(|op| op.dir_to_delete.clone()).collect(),
            results,
        );
        info!(summary = %report.summary(), "Confirmed removals complete");
        report
    }

    #[instrument(skip(self, operations, cancel), fields(operations = operations.len()))]
    pub async fn remove_unconfirmed(
        &self,
        operations: &[UnconfirmedDeleteOperation],
        cancel: &CancellationToken,
    ) -> RemovalReport {
        let dirs: Vec<RemoteDir> = operations.iter().map(|op| op.dir_to_delete.clone()).collect();
        let mut report = RemovalReport {
            planned: dirs.len(),
            dry_run: self.dry_run,
            ..Default::default()
        };

        if !self.force_unconfirmed {
            for dir in &dirs {
                warn!(dir = %dir, "Not removing directory without verified copies");
            }
            report.skipped = dirs;
            return report;
        }

        if self.dry_run {
            for dir in &dirs {
                info!(dir = %dir, "Would remove without copies");
            }
            return report;
        }

        let endpoint_ops = dirs
            .iter()
            .map(|dir| EndpointOperation::new(dir.address.clone(), dir.address.clone(), dir.clone()))
            .collect();

        let results = ParallelEndpointProcessor::invoke(
            self.parallel_degree,
            endpoint_ops,
            |dir: RemoteDir, token: CancellationToken| {
                let remote = self.remote.clone();
                async move {
                    warn!(dir = %dir, "Removing directory without copies");
                    let result = remote.remove_dir(&dir, &token).await;
                    if let Err(e) = &result {
                        error!(dir = %dir, error = %e, "Removal failed");
                    }
                    result
                }
            },
            cancel,
        )
        .await;

        report.collect(dirs, results);
        info!(summary = %report.summary(), "Unconfirmed removals complete");
        report
    }
}

/// Every copy must hold the source's files before the source goes away
async fn verify_and_remove(
    remote: &dyn RemoteFileClient,
    op: &ConfirmedDeleteOperation,
    cancel: &CancellationToken,
) -> Result<()> {
    for copy in &op.copies {
        if !remote
            .source_copied_to_dest(&op.dir_to_delete, copy, cancel)
            .await?
        {
            return Err(BobError::Verification {
                source_dir: op.dir_to_delete.to_string(),
                copy_dir: copy.to_string(),
            });
        }
    }

    remote.remove_dir(&op.dir_to_delete, cancel).await
}
