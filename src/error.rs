//! # Structured Error Handling
//!
//! Top-level error types for the batch engine. Item-level failures inside a
//! chunk are a separate type ([`ItemError`](crate::job::ItemError)) because
//! they are absorbed by the skip/retry policy rather than propagated; the
//! variants here are the errors callers of the engine actually see.

use crate::store::StoreError;
use thiserror::Error;

/// Errors returned by the job engine and recovery service.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The requested job name is not present in the registry. Fatal at
    /// launch, never retried.
    #[error("unknown job: {0}")]
    UnknownJob(String),

    /// No execution record exists for the given id.
    #[error("job execution not found: {0}")]
    ExecutionNotFound(i64),

    /// An execution for the same job instance is still active.
    #[error("job instance {job_name}[{identity}] already has a running execution")]
    AlreadyRunning { job_name: String, identity: String },

    /// The instance identified by these parameters already completed
    /// successfully; launching it again would be a no-op in the original
    /// system and is rejected here.
    #[error("job instance {job_name}[{identity}] already completed")]
    AlreadyComplete { job_name: String, identity: String },

    /// A recovery operation was applied to an execution in the wrong status.
    #[error("invalid execution state for {operation}: expected {expected}, found {found}")]
    InvalidState {
        operation: &'static str,
        expected: &'static str,
        found: String,
    },

    /// A stop request was refused, e.g. the execution has not been running
    /// long enough to stop safely.
    #[error("stop refused for execution {execution_id}: {reason}")]
    StopRefused { execution_id: i64, reason: String },

    /// A step exhausted its fault-tolerance policy or hit a non-recoverable
    /// failure. Carries the triggering failure's message as exit description.
    #[error("step '{step_name}' failed: {message}")]
    StepFailed { step_name: String, message: String },

    /// Malformed job graph or step configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Failure in the execution record store. A store failure during a chunk
    /// commit aborts that chunk and fails the step.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Execution context or statistics payload (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BatchError>;
