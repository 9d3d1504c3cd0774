//! Job execution listeners: before/after hooks around a whole job run.

use crate::model::{JobExecution, StepExecution};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

/// Callbacks around a job execution. `after_job` runs whatever the final
/// status, with the job's step executions as recorded in the store.
#[async_trait]
pub trait JobListener: Send + Sync {
    async fn before_job(&self, _execution: &JobExecution) {}

    async fn after_job(&self, _execution: &JobExecution, _steps: &[StepExecution]) {}
}

/// Default listener logging a start line and an end-of-job summary with
/// per-step counters, the way the original's execution listener reported.
pub struct LoggingJobListener;

#[async_trait]
impl JobListener for LoggingJobListener {
    async fn before_job(&self, execution: &JobExecution) {
        info!(
            job_name = %execution.job_name,
            execution_id = execution.execution_id,
            restart_of = execution.restart_of,
            "Job starting"
        );
    }

    async fn after_job(&self, execution: &JobExecution, steps: &[StepExecution]) {
        for step in steps {
            info!(
                job_name = %execution.job_name,
                execution_id = execution.execution_id,
                step_name = %step.step_name,
                status = %step.status,
                read_count = step.read_count,
                write_count = step.write_count,
                skip_count = step.skip_count,
                commit_count = step.commit_count,
                "Step summary"
            );
        }
        if execution.status == crate::model::BatchStatus::Failed {
            error!(
                job_name = %execution.job_name,
                execution_id = execution.execution_id,
                exit_description = %execution.exit_status.description,
                "Job failed"
            );
        } else {
            info!(
                job_name = %execution.job_name,
                execution_id = execution.execution_id,
                status = %execution.status,
                "Job finished"
            );
        }
    }
}

pub fn logging_listener() -> Arc<dyn JobListener> {
    Arc::new(LoggingJobListener)
}
