//! Alien directory guard
//!
//! Data in alien directories has not reached its final replica yet and the
//! planner cannot account for it, so migration only starts when every alien
//! directory is empty.

use bob_core::{BobError, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::remote::RemoteFileClient;
use crate::state::ClusterState;

pub struct ClusterStateValidator {
    remote: Arc<dyn RemoteFileClient>,
    enabled: bool,
}

impl ClusterStateValidator {
    pub fn new(remote: Arc<dyn RemoteFileClient>, enabled: bool) -> Self {
        Self { remote, enabled }
    }

    #[instrument(skip(self, state, cancel), fields(alien_dirs = state.alien_dirs.len()))]
    pub async fn validate(&self, state: &ClusterState, cancel: &CancellationToken) -> Result<()> {
        if !self.enabled {
            warn!("Alien directory check disabled");
            return Ok(());
        }

        let mut non_empty = Vec::new();
        for dir in &state.alien_dirs {
            if cancel.is_cancelled() {
                return Err(BobError::Cancelled);
            }

            let has_files = self
                .remote
                .dir_contains_files(dir, true, cancel)
                .await
                .map_err(|e| match e {
                    BobError::Cancelled => e,
                    other => BobError::ClusterState(format!(
                        "Failed to inspect alien dir {}: {}",
                        dir, other
                    )),
                })?;

            if has_files {
                warn!(dir = %dir, "Alien directory contains files");
                non_empty.push(dir.to_string());
            }
        }

        if !non_empty.is_empty() {
            return Err(BobError::AlienDirsNotEmpty { dirs: non_empty });
        }

        info!("All alien directories are empty");
        Ok(())
    }
}
