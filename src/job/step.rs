//! Step execution plumbing shared by all node kinds.
//!
//! [`StepRunner`] erases the item types of chunk-oriented steps so that a job
//! graph can hold heterogeneous nodes; [`StepEnv`] carries the cloneable
//! environment a runner needs (store handle, job snapshot, stop flag), which
//! keeps partition workers spawnable as independent tasks.

use crate::error::Result;
use crate::job::Tasklet;
use crate::model::{ExitStatus, JobExecution, StepExecution};
use crate::store::ExecutionStore;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop signal. The engine checks it between nodes; the chunk
/// processor checks it between chunks; the partition manager checks it before
/// dispatching each partition. Already-committed work is never undone.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Environment handed to a step runner. Cloneable so a partitioned step can
/// move a copy into each worker task.
#[derive(Clone)]
pub struct StepEnv {
    pub store: Arc<dyn ExecutionStore>,
    /// Snapshot of the owning job execution at node start.
    pub job_execution: JobExecution,
    pub stop: StopFlag,
    /// Upper bound on concurrently running partitions.
    pub worker_pool_size: usize,
}

/// One executable node body. Implementations update the step execution's
/// counters and context in place and persist them through the store at their
/// own commit boundaries; the engine persists the final status.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, step: &mut StepExecution, env: &StepEnv) -> Result<ExitStatus>;
}

/// Adapts a [`Tasklet`] to the step runner interface.
pub struct TaskletStep {
    tasklet: Arc<dyn Tasklet>,
}

impl TaskletStep {
    pub fn new(tasklet: Arc<dyn Tasklet>) -> Self {
        Self { tasklet }
    }
}

#[async_trait]
impl StepRunner for TaskletStep {
    async fn run(&self, step: &mut StepExecution, env: &StepEnv) -> Result<ExitStatus> {
        self.tasklet
            .execute(&env.job_execution, &mut step.context)
            .await
    }
}
