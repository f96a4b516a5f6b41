//! Work specification planner
//!
//! Turns a [`ClusterState`] into the directory copies needed to populate new
//! replica locations and the deletions of locations no longer in use.
//!
//! Planning is a pure, deterministic function of its input:
//! - every missing replica dir gets exactly one source among its vdisk's old dirs
//! - sources that are going away and still unused are drained first
//! - then the least loaded source address wins, same-host copies get a bonus
//! - obsolete dirs used as a source become confirmed deletions, the rest unconfirmed

use bob_core::{NodeDisk, RemoteDir};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, info, instrument};

use crate::state::ClusterState;

/// Copy the contents of `from` into `to`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOperation {
    pub from: RemoteDir,
    pub to: RemoteDir,
    /// Disks that need a restart once this copy lands
    pub affected_new_node_disks: Vec<NodeDisk>,
}

/// Obsolete dir that served as a copy source. Deleted only after every copy
/// is verified to contain its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedDeleteOperation {
    pub dir_to_delete: RemoteDir,
    pub copies: Vec<RemoteDir>,
}

/// Obsolete dir no destination needed, so there is nothing to verify against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnconfirmedDeleteOperation {
    pub dir_to_delete: RemoteDir,
}

/// Planner output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkSpecification {
    pub copy_operations: Vec<CopyOperation>,
    pub confirmed_delete_operations: Vec<ConfirmedDeleteOperation>,
    pub unconfirmed_delete_operations: Vec<UnconfirmedDeleteOperation>,
}

impl WorkSpecification {
    pub fn is_empty(&self) -> bool {
        self.copy_operations.is_empty()
            && self.confirmed_delete_operations.is_empty()
            && self.unconfirmed_delete_operations.is_empty()
    }

    /// Summary of the plan
    pub fn summary(&self) -> String {
        format!(
            "{} copies, {} confirmed deletions, {} unconfirmed deletions",
            self.copy_operations.len(),
            self.confirmed_delete_operations.len(),
            self.unconfirmed_delete_operations.len()
        )
    }
}

impl fmt::Display for WorkSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Per-pass bookkeeping used to rank candidate sources
#[derive(Default)]
struct SourceLoad {
    by_address: HashMap<String, i64>,
    uses_by_dir: HashMap<RemoteDir, usize>,
}

impl SourceLoad {
    /// Lower is better
    fn rank(&self, source: &RemoteDir, dest: &RemoteDir, dirs_to_delete: &BTreeSet<RemoteDir>) -> (bool, i64) {
        let unused = self.uses_by_dir.get(source).copied().unwrap_or(0) == 0;
        let drain_first = dirs_to_delete.contains(source) && unused;

        let mut load = self.by_address.get(&source.address).copied().unwrap_or(0);
        if source.address == dest.address {
            load -= 1;
        }

        (!drain_first, load)
    }

    fn record(&mut self, source: &RemoteDir) {
        *self.by_address.entry(source.address.clone()).or_default() += 1;
        *self.uses_by_dir.entry(source.clone()).or_default() += 1;
    }
}

pub struct WorkSpecificationFinder;

impl WorkSpecificationFinder {
    #[instrument(skip(state), fields(vdisks = state.vdisks.len()))]
    pub fn find(state: &ClusterState) -> WorkSpecification {
        let mut dirs_to_delete: BTreeSet<RemoteDir> = BTreeSet::new();
        let mut sources_by_dest: BTreeMap<RemoteDir, BTreeSet<RemoteDir>> = BTreeMap::new();
        let mut node_disks_by_dest: HashMap<RemoteDir, Vec<NodeDisk>> = HashMap::new();

        for info in &state.vdisks {
            let old: BTreeSet<&RemoteDir> = info.old_dirs.iter().map(|d| &d.dir).collect();
            let new: BTreeSet<&RemoteDir> = info.new_dirs.iter().map(|d| &d.dir).collect();

            dirs_to_delete.extend(old.difference(&new).map(|d| (*d).clone()));

            for replica in info.new_dirs.iter().filter(|d| !old.contains(&d.dir)) {
                if old.is_empty() {
                    debug!(vdisk = info.vdisk.id, dest = %replica.dir, "No source for new replica");
                    continue;
                }

                sources_by_dest
                    .entry(replica.dir.clone())
                    .or_default()
                    .extend(old.iter().map(|d| (*d).clone()));

                let node_disks = node_disks_by_dest.entry(replica.dir.clone()).or_default();
                if !node_disks.contains(&replica.node_disk) {
                    node_disks.push(replica.node_disk.clone());
                }
            }
        }

        let copy_operations =
            Self::select_sources(&sources_by_dest, &mut node_disks_by_dest, &dirs_to_delete);

        let mut copied_to_by_old_dir: BTreeMap<&RemoteDir, Vec<RemoteDir>> = BTreeMap::new();
        for op in &copy_operations {
            let copies = copied_to_by_old_dir.entry(&op.from).or_default();
            if !copies.contains(&op.to) {
                copies.push(op.to.clone());
            }
        }

        let mut confirmed_delete_operations = Vec::new();
        let mut unconfirmed_delete_operations = Vec::new();
        for dir in dirs_to_delete {
            match copied_to_by_old_dir.remove(&dir) {
                Some(copies) => confirmed_delete_operations.push(ConfirmedDeleteOperation {
                    dir_to_delete: dir,
                    copies,
                }),
                None => {
                    unconfirmed_delete_operations.push(UnconfirmedDeleteOperation { dir_to_delete: dir })
                }
            }
        }

        let plan = WorkSpecification {
            copy_operations,
            confirmed_delete_operations,
            unconfirmed_delete_operations,
        };

        info!(summary = %plan.summary(), "Work specification found");
        plan
    }

    fn select_sources(
        sources_by_dest: &BTreeMap<RemoteDir, BTreeSet<RemoteDir>>,
        node_disks_by_dest: &mut HashMap<RemoteDir, Vec<NodeDisk>>,
        dirs_to_delete: &BTreeSet<RemoteDir>,
    ) -> Vec<CopyOperation> {
        let mut dests: Vec<(&RemoteDir, &BTreeSet<RemoteDir>)> = sources_by_dest.iter().collect();
        dests.sort_by(|(dest_a, sources_a), (dest_b, sources_b)| {
            sources_a
                .first()
                .cmp(&sources_b.first())
                .then_with(|| dest_a.cmp(dest_b))
        });

        let mut load = SourceLoad::default();
        let mut operations = Vec::with_capacity(dests.len());

        for (dest, sources) in dests {
            let best = sources.iter().min_by(|a, b| {
                load.rank(a, dest, dirs_to_delete)
                    .cmp(&load.rank(b, dest, dirs_to_delete))
                    .then_with(|| a.cmp(b))
            });

            let Some(best) = best else {
                continue;
            };

            load.record(best);
            debug!(from = %best, to = %dest, candidates = sources.len(), "Selected copy source");

            operations.push(CopyOperation {
                from: best.clone(),
                to: dest.clone(),
                affected_new_node_disks: node_disks_by_dest.remove(dest).unwrap_or_default(),
            });
        }

        operations
    }
}
