use super::{BatchStatus, ExecutionContext, ExitStatus, JobParameters};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One logical identity of a job for a given set of identifying parameters.
/// An instance may accumulate multiple executions through restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInstance {
    pub instance_id: i64,
    pub job_name: String,
    pub identity_key: String,
    pub created_at: DateTime<Utc>,
}

/// One concrete run attempt of a job instance.
///
/// Created at launch, mutated only by the job engine and recovery service,
/// terminal once COMPLETED/FAILED/STOPPED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub execution_id: i64,
    pub instance_id: i64,
    pub job_name: String,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    pub parameters: JobParameters,
    /// Job-level context, visible to deciders and merged from finished steps.
    pub context: ExecutionContext,
    /// Back-reference to the execution this one restarts, if any.
    pub restart_of: Option<i64>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl JobExecution {
    /// Wall-clock running time, from start until end (or now if still
    /// running). `None` before the execution has started.
    pub fn running_time(&self) -> Option<chrono::Duration> {
        let start = self.start_time?;
        let end = self.end_time.unwrap_or_else(Utc::now);
        Some(end - start)
    }
}

/// One node's execution within a job execution, with the counters the chunk
/// processor maintains at commit boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_execution_id: i64,
    pub execution_id: i64,
    pub step_name: String,
    pub status: BatchStatus,
    pub exit_status: ExitStatus,
    /// Items pulled from the reader.
    pub read_count: u64,
    /// Items written through fully committed chunks.
    pub write_count: u64,
    /// Items the processor filtered out (not written, not skipped).
    pub filter_count: u64,
    /// Items discarded under the skip policy.
    pub skip_count: u64,
    /// Chunks aborted before commit.
    pub rollback_count: u64,
    /// Fully committed chunks.
    pub commit_count: u64,
    /// Step-scoped key/value state.
    pub context: ExecutionContext,
    /// Messages from failures that hit this step (skipped or fatal).
    pub failure_messages: Vec<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl StepExecution {
    pub fn new(step_execution_id: i64, execution_id: i64, step_name: impl Into<String>) -> Self {
        Self {
            step_execution_id,
            execution_id,
            step_name: step_name.into(),
            status: BatchStatus::Starting,
            exit_status: ExitStatus::completed(),
            read_count: 0,
            write_count: 0,
            filter_count: 0,
            skip_count: 0,
            rollback_count: 0,
            commit_count: 0,
            context: ExecutionContext::new(),
            failure_messages: Vec::new(),
            start_time: None,
            end_time: None,
        }
    }
}
