//! # Execution Record Store
//!
//! Durable record of job instances, executions and step executions.
//! Creation is append-only; status and counter updates are the only permitted
//! mutation and happen only at commit points (chunk commit, node completion,
//! job completion). Reads return `Option` rather than an error when an id is
//! unknown, so callers can branch on absence.
//!
//! Two implementations ship with the crate: [`InMemoryStore`] (dashmap-backed,
//! used by the engine's tests and as the default) and [`PgStore`] (sqlx over
//! the schema in `migrations/`).
//!
//! A separate [`StatisticsSink`] holds opaque serialized report payloads keyed
//! by (report type, target date); the engine is agnostic to payload contents.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use crate::model::{JobExecution, JobInstance, JobParameters, StepExecution};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use thiserror::Error;

/// Errors from the execution record store and statistics sink.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    /// Update targeted a record that was never created.
    #[error("{kind} {id} does not exist")]
    MissingRecord { kind: &'static str, id: i64 },

    /// An execution's terminal status is immutable once set.
    #[error("execution {id} is terminal ({status}) and cannot be updated")]
    TerminalStatus { id: i64, status: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Append-only record store for job instances, executions and step
/// executions.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Find the instance for a (job name, identity key) pair, creating it on
    /// first launch.
    async fn find_or_create_instance(
        &self,
        job_name: &str,
        identity_key: &str,
    ) -> StoreResult<JobInstance>;

    async fn find_instance(
        &self,
        job_name: &str,
        identity_key: &str,
    ) -> StoreResult<Option<JobInstance>>;

    /// Create a new execution for an instance. `restart_of` carries the
    /// back-reference when the execution is a restart.
    async fn create_execution(
        &self,
        instance: &JobInstance,
        parameters: JobParameters,
        restart_of: Option<i64>,
    ) -> StoreResult<JobExecution>;

    /// Persist status/exit/context changes for an execution. Rejects updates
    /// that would change an already-terminal status.
    async fn update_execution(&self, execution: &JobExecution) -> StoreResult<()>;

    async fn execution(&self, execution_id: i64) -> StoreResult<Option<JobExecution>>;

    async fn executions_for_instance(&self, instance_id: i64) -> StoreResult<Vec<JobExecution>>;

    /// Executions in a non-terminal status for the given job name.
    async fn running_executions(&self, job_name: &str) -> StoreResult<Vec<JobExecution>>;

    /// Job names with at least one known instance.
    async fn job_names(&self) -> StoreResult<Vec<String>>;

    /// Instances for a job name, newest first, paginated.
    async fn instances(
        &self,
        job_name: &str,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<JobInstance>>;

    async fn create_step_execution(
        &self,
        execution_id: i64,
        step_name: &str,
    ) -> StoreResult<StepExecution>;

    /// Persist counters/status/context for a step execution. Called at each
    /// chunk commit and at node completion; a failure here fails the step.
    async fn update_step_execution(&self, step: &StepExecution) -> StoreResult<()>;

    async fn step_executions(&self, execution_id: i64) -> StoreResult<Vec<StepExecution>>;
}

/// Generic statistics sink keyed by (report type, target date).
///
/// Writes are upserts: a retried step or partition overwrites its prior
/// attempt instead of inserting a duplicate row.
#[async_trait]
pub trait StatisticsSink: Send + Sync {
    async fn upsert(
        &self,
        report_type: &str,
        target_date: NaiveDate,
        payload: Value,
    ) -> StoreResult<()>;

    async fn fetch(&self, report_type: &str, target_date: NaiveDate) -> StoreResult<Option<Value>>;
}
