//! # Batch Data Model
//!
//! Execution records and their supporting value types:
//!
//! - [`BatchStatus`] / [`ExitStatus`] - lifecycle status and flow-routing outcome
//! - [`JobParameters`] - identifying and non-identifying launch parameters
//! - [`JobInstance`] / [`JobExecution`] / [`StepExecution`] - durable records
//! - [`ExecutionContext`] - serializable key/value state scoped per execution
//! - [`PartitionDescriptor`] - one slice of a partitioned step's input
//!
//! Records are plain data; every mutation goes through the
//! [`ExecutionStore`](crate::store::ExecutionStore) at well-defined commit
//! points.

mod context;
mod execution;
mod parameters;
mod partition;
mod status;

pub use context::ExecutionContext;
pub use execution::{JobExecution, JobInstance, StepExecution};
pub use parameters::{JobParameters, ParameterValue};
pub use partition::{
    partition_result_key, PartitionDescriptor, PARTITION_ID_KEY, RANGE_END_KEY, RANGE_START_KEY,
};
pub use status::{BatchStatus, ExitStatus};
