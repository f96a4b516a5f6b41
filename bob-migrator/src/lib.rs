//! Bob Migrator Library
//!
//! Moves a bob cluster from one topology to another:
//! - Resolves where every vdisk replica lives before and after the change
//! - Refuses to run while alien staging directories hold data
//! - Plans a deterministic, load-spread set of directory copies and deletions
//! - Executes copies and removals over ssh/rsync with endpoint-balanced parallelism
//! - Restarts affected disks through the node HTTP API

pub mod alterer;
pub mod config;
pub mod copier;
pub mod node_api;
pub mod planner;
pub mod processor;
pub mod remote;
pub mod remover;
pub mod resolver;
pub mod restarter;
pub mod state;
pub mod validator;

// Re-export main types
pub use alterer::{AlterReport, ClusterStateAlterer};
pub use config::{MigratorConfig, RootDirOverrides, SshSettings};
pub use copier::{Copier, CopyReport, FailedCopy};
pub use node_api::{HttpNodeApi, NodeApi, SimulatedNodeApi};
pub use planner::{
    ConfirmedDeleteOperation, CopyOperation, UnconfirmedDeleteOperation, WorkSpecification,
    WorkSpecificationFinder,
};
pub use processor::{EndpointOperation, ParallelEndpointProcessor};
pub use remote::{RemoteFileClient, SimulatedRemoteFileClient, SshRemoteFileClient};
pub use remover::{FailedRemoval, RemovalReport, Remover};
pub use resolver::{DirsByDiskByNode, TopologyResolver};
pub use restarter::{DiskRestarter, FailedRestart, RestartReport};
pub use state::{
    ClusterState, ClusterStateFinder, ConfigurationSource, FileConfigurationSource,
    StaticConfigurationSource, VDiskInfo,
};
pub use validator::ClusterStateValidator;
