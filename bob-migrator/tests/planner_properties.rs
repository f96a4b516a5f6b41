//! Planner properties over generated topologies

use bob_core::{ClusterConfig, Disk, Node, RemoteDir, Replica, VDisk};
use bob_migrator::planner::WorkSpecificationFinder;
use bob_migrator::resolver::DirsByDiskByNode;
use bob_migrator::state::{build_cluster_state, ClusterState};
use proptest::prelude::*;
use proptest::sample::subsequence;
use std::collections::{BTreeSet, HashMap};

const NODE_COUNT: usize = 4;
const DISKS: [&str; 2] = ["disk1", "disk2"];

fn node_name(i: usize) -> String {
    format!("node{}", i)
}

fn nodes() -> Vec<Node> {
    (0..NODE_COUNT)
        .map(|i| Node {
            name: node_name(i),
            address: format!("10.0.0.{}:20000", i + 1),
            disks: DISKS
                .iter()
                .map(|d| Disk {
                    name: d.to_string(),
                    path: format!("/mnt/{}", d),
                })
                .collect(),
        })
        .collect()
}

fn roots() -> DirsByDiskByNode {
    (0..NODE_COUNT)
        .map(|i| {
            let disks: HashMap<String, RemoteDir> = DISKS
                .iter()
                .map(|d| {
                    (
                        d.to_string(),
                        RemoteDir::new(format!("10.0.0.{}", i + 1), format!("/mnt/{}/bob", d)),
                    )
                })
                .collect();
            (node_name(i), disks)
        })
        .collect()
}

fn placements() -> Vec<(usize, &'static str)> {
    (0..NODE_COUNT)
        .flat_map(|n| DISKS.iter().map(move |d| (n, *d)))
        .collect()
}

fn replica_set() -> impl Strategy<Value = Vec<(usize, &'static str)>> {
    subsequence(placements(), 1..=3)
}

/// (old replicas, new replicas) per vdisk, ids counting from 1
fn topology() -> impl Strategy<Value = Vec<(Vec<(usize, &'static str)>, Vec<(usize, &'static str)>)>> {
    prop::collection::vec((replica_set(), replica_set()), 1..8)
}

fn config(vdisks: &[Vec<(usize, &'static str)>]) -> ClusterConfig {
    ClusterConfig {
        nodes: nodes(),
        vdisks: vdisks
            .iter()
            .enumerate()
            .map(|(i, replicas)| VDisk {
                id: i as u32 + 1,
                replicas: replicas
                    .iter()
                    .map(|(n, d)| Replica {
                        node: node_name(*n),
                        disk: d.to_string(),
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn cluster_state(topology: &[(Vec<(usize, &'static str)>, Vec<(usize, &'static str)>)]) -> ClusterState {
    let old: Vec<_> = topology.iter().map(|(o, _)| o.clone()).collect();
    let new: Vec<_> = topology.iter().map(|(_, n)| n.clone()).collect();
    let roots = roots();
    build_cluster_state(&config(&old), &config(&new), &roots, &roots).unwrap()
}

proptest! {
    #[test]
    fn every_new_dir_gets_one_valid_source(topology in topology()) {
        let state = cluster_state(&topology);
        let plan = WorkSpecificationFinder::find(&state);

        for info in &state.vdisks {
            let old: BTreeSet<&RemoteDir> = info.old_dirs.iter().map(|d| &d.dir).collect();
            for new_dir in info.new_dirs.iter().map(|d| &d.dir) {
                let copies: Vec<_> = plan.copy_operations.iter().filter(|op| &op.to == new_dir).collect();
                if old.contains(new_dir) {
                    prop_assert!(copies.is_empty());
                } else {
                    prop_assert_eq!(copies.len(), 1);
                    prop_assert!(old.contains(&copies[0].from));
                }
            }
        }
    }

    #[test]
    fn deletions_partition_obsolete_dirs(topology in topology()) {
        let state = cluster_state(&topology);
        let plan = WorkSpecificationFinder::find(&state);

        let mut obsolete = BTreeSet::new();
        for info in &state.vdisks {
            let new: BTreeSet<&RemoteDir> = info.new_dirs.iter().map(|d| &d.dir).collect();
            obsolete.extend(info.old_dirs.iter().map(|d| &d.dir).filter(|d| !new.contains(d)).cloned());
        }

        let confirmed: BTreeSet<RemoteDir> = plan
            .confirmed_delete_operations
            .iter()
            .map(|op| op.dir_to_delete.clone())
            .collect();
        let unconfirmed: BTreeSet<RemoteDir> = plan
            .unconfirmed_delete_operations
            .iter()
            .map(|op| op.dir_to_delete.clone())
            .collect();

        prop_assert!(confirmed.is_disjoint(&unconfirmed));
        prop_assert_eq!(confirmed.union(&unconfirmed).cloned().collect::<BTreeSet<_>>(), obsolete);

        for op in &plan.confirmed_delete_operations {
            let expected: BTreeSet<&RemoteDir> = plan
                .copy_operations
                .iter()
                .filter(|c| c.from == op.dir_to_delete)
                .map(|c| &c.to)
                .collect();
            prop_assert_eq!(op.copies.iter().collect::<BTreeSet<_>>(), expected);
        }
        for op in &plan.unconfirmed_delete_operations {
            prop_assert!(plan.copy_operations.iter().all(|c| c.from != op.dir_to_delete));
        }
    }

    #[test]
    fn planning_is_deterministic(topology in topology()) {
        let state = cluster_state(&topology);
        prop_assert_eq!(WorkSpecificationFinder::find(&state), WorkSpecificationFinder::find(&state));
    }
}
