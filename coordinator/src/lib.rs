pub mod backend;
pub mod config;
pub mod coordinator;
pub mod dag;
pub mod dispatch;
pub mod error;
pub mod instance;
pub mod job;
pub mod liveness;
pub mod load;
pub mod report;
pub mod status;
pub mod unit;
pub mod waiter;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::*;
pub use config::CoordinatorConfig;
pub use coordinator::{Collaborators, Coordinator};
pub use dag::{ExecutionDag, FragmentInstanceSpec};
pub use dispatch::{CancelDispatcher, CancelTarget, DispatchPool};
pub use error::{CoordError, Result};
pub use instance::InstanceAssignment;
pub use job::*;
pub use liveness::NodeLivenessProvider;
pub use load::AggregatedLoadMetadata;
pub use report::*;
pub use status::{ExecStatus, StatusCode};
pub use unit::{ExecutionUnit, InstanceId, NodeAddress, UnitState};
