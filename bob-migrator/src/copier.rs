//! Copy executor
//!
//! Runs planned copy operations through the endpoint-balanced processor.
//! Transport failures are reported per operation and never retried here.

use bob_core::{BobError, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::planner::CopyOperation;
use crate::processor::{EndpointOperation, ParallelEndpointProcessor};
use crate::remote::RemoteFileClient;

/// A copy that did not complete
#[derive(Debug, Clone)]
pub struct FailedCopy {
    pub operation: CopyOperation,
    pub error: BobError,
}

/// Outcome of the copy phase
#[derive(Debug, Default)]
pub struct CopyReport {
    pub planned: usize,
    pub succeeded: Vec<CopyOperation>,
    pub failed: Vec<FailedCopy>,
    pub duration: Duration,
    pub dry_run: bool,
}

impl CopyReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn summary(&self) -> String {
        if self.dry_run {
            return format!("{} copies planned (dry run)", self.planned);
        }
        format!(
            "{} of {} copies succeeded, {} failed in {:?}",
            self.succeeded.len(),
            self.planned,
            self.failed.len(),
            self.duration
        )
    }
}

pub struct Copier {
    remote: Arc<dyn RemoteFileClient>,
    dry_run: bool,
    continue_on_error: bool,
}

impl Copier {
    pub fn new(remote: Arc<dyn RemoteFileClient>, dry_run: bool, continue_on_error: bool) -> Self {
        Self {
            remote,
            dry_run,
            continue_on_error,
        }
    }

    #[instrument(skip(self, operations, cancel), fields(operations = operations.len()))]
    pub async fn copy(
        &self,
        operations: &[CopyOperation],
        parallel_degree: usize,
        cancel: &CancellationToken,
    ) -> CopyReport {
        let start = Instant::now();
        let mut report = CopyReport {
            planned: operations.len(),
            dry_run: self.dry_run,
            ..Default::default()
        };

        if self.dry_run {
            for op in operations {
                info!(from = %op.from, to = %op.to, "Would copy");
            }
            return report;
        }

        if operations.is_empty() {
            info!("No copies to execute");
            return report;
        }

        // Without continue-on-error the first failure stops the rest of the phase
        let phase = cancel.child_token();
        let stop_on_error = !self.continue_on_error;

        let endpoint_ops = operations
            .iter()
            .map(|op| EndpointOperation::new(op.from.address.clone(), op.to.address.clone(), op.clone()))
            .collect();

        let results = ParallelEndpointProcessor::invoke(
            parallel_degree,
            endpoint_ops,
            |op: CopyOperation, token: CancellationToken| {
                let remote = self.remote.clone();
                let phase = phase.clone();
                async move {
                    let result: Result<()> = remote.copy(&op.from, &op.to, &token).await;
                    if let Err(e) = &result {
                        error!(from = %op.from, to = %op.to, error = %e, "Copy failed");
                        if stop_on_error && !matches!(e, BobError::Cancelled) {
                            phase.cancel();
                        }
                    }
                    result
                }
            },
            &phase,
        )
        .await;

        for (op, result) in operations.iter().zip(results) {
            match result {
                Ok(()) => report.succeeded.push(op.clone()),
                Err(error) => report.failed.push(FailedCopy {
                    operation: op.clone(),
                    error,
                }),
            }
        }

        report.duration = start.elapsed();
        info!(summary = %report.summary(), "Copy phase complete");
        report
    }
}
