//! # Partitioned Execution
//!
//! Splits one step's input key space into disjoint slices and runs a worker
//! step per slice on a bounded pool. The manager creates a child step
//! execution per partition (named `{step}:partition{N}`), seeds each child's
//! context with the slice boundaries, dispatches children up to the
//! configured pool size, and aggregates their counters and statuses when all
//! have finished.
//!
//! Failure isolation is deliberate: a failing partition never cancels its
//! siblings. In-flight and queued partitions run to completion so their
//! committed work survives, and only then does the manager report FAILED.
//! Re-running a failed execution re-runs every partition; per-partition
//! results are keyed by (execution, partition) so a re-run overwrites its own
//! prior output.

use crate::error::{BatchError, Result};
use crate::job::{StepEnv, StepRunner};
use crate::model::{
    partition_result_key, BatchStatus, ExitStatus, PartitionDescriptor, StepExecution,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Splits the input into disjoint slices. Implementations must cover every
/// input key exactly once across the returned descriptors.
#[async_trait]
pub trait Partitioner: Send + Sync {
    async fn partition(&self, grid_size: usize) -> Result<Vec<PartitionDescriptor>>;
}

/// Source of the inclusive `(min, max)` key bounds a range partitioner
/// splits. `None` means the bounds could not be determined (e.g. an empty
/// table); the partitioner then falls back to one full-domain partition.
#[async_trait]
pub trait KeyRangeProvider: Send + Sync {
    async fn key_range(&self) -> Result<Option<(i64, i64)>>;
}

/// Fixed bounds, for tests and fully in-memory jobs.
pub struct StaticKeyRange(pub i64, pub i64);

#[async_trait]
impl KeyRangeProvider for StaticKeyRange {
    async fn key_range(&self) -> Result<Option<(i64, i64)>> {
        Ok(Some((self.0, self.1)))
    }
}

/// Splits `[min, max]` into up to `grid_size` contiguous inclusive ranges.
///
/// Each partition gets `(max - min + 1) / grid_size` keys (at least one);
/// the last partition absorbs the remainder so the union is exactly
/// `[min, max]` with no overlap. A key space smaller than the grid yields
/// fewer partitions rather than empty ones.
///
/// When the key domain cannot be read - the provider fails or reports no
/// bounds - the split degrades to a single partition covering the whole
/// domain instead of failing the step. The partition's reader then simply
/// finds whatever is there (usually nothing).
pub struct RangePartitioner {
    provider: Arc<dyn KeyRangeProvider>,
}

impl RangePartitioner {
    pub fn new(provider: Arc<dyn KeyRangeProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl Partitioner for RangePartitioner {
    async fn partition(&self, grid_size: usize) -> Result<Vec<PartitionDescriptor>> {
        let (min, max) = match self.provider.key_range().await {
            Ok(Some(bounds)) => bounds,
            Ok(None) => {
                info!("Key domain is empty, falling back to a single full-domain partition");
                return Ok(vec![full_domain_partition()]);
            }
            Err(error) => {
                warn!(
                    error = %error,
                    "Key domain unreadable, falling back to a single full-domain partition"
                );
                return Ok(vec![full_domain_partition()]);
            }
        };
        if min > max {
            return Err(BatchError::Configuration(format!(
                "key range is inverted: min {min} > max {max}"
            )));
        }
        let grid = grid_size.max(1) as i64;
        let span = max - min + 1;
        let range_size = (span / grid).max(1);

        let mut descriptors = Vec::new();
        let mut start = min;
        let mut partition_id = 0usize;
        while start <= max {
            let is_last = partition_id as i64 == grid - 1;
            let end = if is_last {
                max
            } else {
                (start + range_size - 1).min(max)
            };
            descriptors.push(PartitionDescriptor::for_range(partition_id, start, end));
            if end == max {
                break;
            }
            start = end + 1;
            partition_id += 1;
        }
        Ok(descriptors)
    }
}

fn full_domain_partition() -> PartitionDescriptor {
    PartitionDescriptor::for_range(0, i64::MIN, i64::MAX)
}

/// Manager step: partitions the input and runs `worker` once per partition
/// on a pool bounded by the environment's worker pool size.
pub struct PartitionedStep {
    grid_size: usize,
    partitioner: Arc<dyn Partitioner>,
    worker: Arc<dyn StepRunner>,
}

impl PartitionedStep {
    pub fn new(
        grid_size: usize,
        partitioner: Arc<dyn Partitioner>,
        worker: Arc<dyn StepRunner>,
    ) -> Self {
        Self {
            grid_size,
            partitioner,
            worker,
        }
    }
}

/// What one partition worker task reports back to the manager.
struct PartitionOutcome {
    descriptor: PartitionDescriptor,
    step: StepExecution,
    failure: Option<String>,
}

#[async_trait]
impl StepRunner for PartitionedStep {
    async fn run(&self, step: &mut StepExecution, env: &StepEnv) -> Result<ExitStatus> {
        let descriptors = self.partitioner.partition(self.grid_size).await?;
        if descriptors.is_empty() {
            info!(step_name = %step.step_name, "No input to partition");
            return Ok(ExitStatus::completed().with_description("no partitions"));
        }
        info!(
            step_name = %step.step_name,
            partitions = descriptors.len(),
            worker_pool_size = env.worker_pool_size,
            "Dispatching partitions"
        );

        let semaphore = Arc::new(Semaphore::new(env.worker_pool_size.max(1)));
        let mut tasks: JoinSet<Result<PartitionOutcome>> = JoinSet::new();
        let mut dispatched = 0usize;
        let mut stopped = false;

        for descriptor in descriptors {
            // A stop request stops dispatching; in-flight partitions run to
            // completion so their committed chunks survive.
            if env.stop.is_requested() {
                stopped = true;
                break;
            }
            let child_name = format!("{}:{}", step.step_name, descriptor.name);
            let mut child = env
                .store
                .create_step_execution(env.job_execution.execution_id, &child_name)
                .await?;
            child.context = step.context.clone();
            child.context.merge(&descriptor.context);

            let permit_source = semaphore.clone();
            let worker = self.worker.clone();
            let worker_env = env.clone();
            dispatched += 1;
            tasks.spawn(async move {
                let _permit = permit_source
                    .acquire_owned()
                    .await
                    .map_err(|_| BatchError::StepFailed {
                        step_name: child.step_name.clone(),
                        message: "worker pool closed".to_string(),
                    })?;
                child.status = BatchStatus::Started;
                child.start_time = Some(chrono::Utc::now());
                worker_env.store.update_step_execution(&child).await?;

                let run_result = worker.run(&mut child, &worker_env).await;
                let (status, exit, failure) = match &run_result {
                    Ok(exit) if exit.is_failed() => (
                        BatchStatus::Failed,
                        exit.clone(),
                        Some(exit.description.clone()),
                    ),
                    Ok(exit) => (BatchStatus::Completed, exit.clone(), None),
                    Err(err) => (
                        BatchStatus::Failed,
                        ExitStatus::failed().with_description(err.to_string()),
                        Some(err.to_string()),
                    ),
                };
                child.status = status;
                child.exit_status = exit;
                child.end_time = Some(chrono::Utc::now());
                worker_env.store.update_step_execution(&child).await?;
                Ok(PartitionOutcome {
                    descriptor,
                    step: child,
                    failure,
                })
            });
        }

        let mut failures: Vec<String> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => {
                    failures.push(err.to_string());
                    continue;
                }
                Err(join_err) => {
                    error!(error = %join_err, "Partition worker task panicked");
                    failures.push(format!("partition worker panicked: {join_err}"));
                    continue;
                }
            };

            // Aggregate the child's counters onto the manager record and
            // publish its result under a deterministic per-partition key so
            // a re-run overwrites rather than duplicates.
            step.read_count += outcome.step.read_count;
            step.write_count += outcome.step.write_count;
            step.filter_count += outcome.step.filter_count;
            step.skip_count += outcome.step.skip_count;
            step.commit_count += outcome.step.commit_count;
            step.rollback_count += outcome.step.rollback_count;
            let result_key = partition_result_key(
                env.job_execution.execution_id,
                outcome.descriptor.partition_id,
            );
            step.context.put(
                result_key,
                serde_json::json!({
                    "partition": outcome.descriptor.name,
                    "status": outcome.step.status.to_string(),
                    "readCount": outcome.step.read_count,
                    "writeCount": outcome.step.write_count,
                }),
            );

            if let Some(message) = outcome.failure {
                warn!(
                    partition = %outcome.descriptor.name,
                    message = %message,
                    "Partition failed"
                );
                failures.push(format!("{}: {message}", outcome.descriptor.name));
            }
        }
        env.store.update_step_execution(step).await?;

        if !failures.is_empty() {
            failures.sort();
            return Err(BatchError::StepFailed {
                step_name: step.step_name.clone(),
                message: format!(
                    "{} of {dispatched} partitions failed: {}",
                    failures.len(),
                    failures.join("; ")
                ),
            });
        }
        if stopped {
            return Ok(ExitStatus::stopped().with_description("stop requested during dispatch"));
        }
        Ok(ExitStatus::completed())
    }
}
