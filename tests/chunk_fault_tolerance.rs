//! Chunk processor behavior under the skip/retry policy, end to end through
//! the engine: counters move only at commit boundaries and failures beyond
//! policy limits fail the step with the triggering message.

mod common;

use anyhow::Result;
use common::{test_engine, FailOn, PoisonedWriter};
use librarian_batch::chunk::{ChunkStep, ClassFilter, FaultTolerance};
use librarian_batch::job::{FailureClass, ItemError, JobDefinition, JobRegistry};
use librarian_batch::model::{BatchStatus, JobParameters, StepExecution};
use librarian_batch::store::{ExecutionStore, InMemoryStore};
use librarian_batch::test_support::{CollectingWriter, VecReader};
use parking_lot::Mutex;
use std::sync::Arc;

const STEP: &str = "processBooks";

fn book_policy(skip_limit: u64) -> FaultTolerance {
    FaultTolerance::new()
        .skip_limit(skip_limit)
        .retry_limit(3)
        .retry_on(ClassFilter::Only(vec![FailureClass::Transient]))
        .skip_on(ClassFilter::Only(vec![FailureClass::Data]))
}

async fn run_book_job(
    chunk: ChunkStep<i64, i64>,
) -> Result<(BatchStatus, StepExecution, Arc<InMemoryStore>)> {
    let registry = Arc::new(JobRegistry::new());
    registry.register(
        JobDefinition::builder("bookProcessingJob")
            .step(STEP, Arc::new(chunk))
            .build()?,
    );
    let (engine, store) = test_engine(registry);
    let execution_id = engine.launch("bookProcessingJob", JobParameters::new()).await?;
    engine.join(execution_id).await?;

    let execution = store.execution(execution_id).await?.expect("execution");
    let step = store
        .step_executions(execution_id)
        .await?
        .into_iter()
        .find(|s| s.step_name == STEP)
        .expect("step record");
    Ok((execution.status, step, store))
}

/// chunkSize=10, skipLimit=5, retryLimit=3, 12 items, item #7 always fails
/// with a skippable non-retryable error: the item is skipped, everything
/// else is written.
#[tokio::test]
async fn test_skippable_failure_within_limit_completes() -> Result<()> {
    let (sink, writer) = CollectingWriter::shared();
    let chunk = ChunkStep::builder(10)
        .reader(|_| Box::new(VecReader::new((1..=12).collect())))
        .processor(Arc::new(FailOn {
            value: 7,
            error: ItemError::data("invalid ISBN on item 7"),
        }))
        .writer(move |_| Box::new(writer.clone()))
        .fault_tolerance(book_policy(5))
        .build()?;

    let (status, step, _) = run_book_job(chunk).await?;
    assert_eq!(status, BatchStatus::Completed);
    assert_eq!(step.status, BatchStatus::Completed);
    assert_eq!(step.read_count, 12);
    assert_eq!(step.write_count, 11);
    assert_eq!(step.skip_count, 1);
    assert_eq!(step.commit_count, 2);
    assert!(step.failure_messages.iter().any(|m| m.contains("item 7")));

    let written = sink.lock().clone();
    assert_eq!(written.len(), 11);
    assert!(!written.contains(&7));
    Ok(())
}

/// Same step with skipLimit=0: item #7's failure aborts the whole first
/// chunk, so nothing is written but the reads are on record.
#[tokio::test]
async fn test_skip_limit_zero_fails_chunk_without_writes() -> Result<()> {
    let (sink, writer) = CollectingWriter::shared();
    let chunk = ChunkStep::builder(10)
        .reader(|_| Box::new(VecReader::new((1..=12).collect())))
        .processor(Arc::new(FailOn {
            value: 7,
            error: ItemError::data("invalid ISBN on item 7"),
        }))
        .writer(move |_| Box::new(writer.clone()))
        .fault_tolerance(book_policy(0))
        .build()?;

    let (status, step, _) = run_book_job(chunk).await?;
    assert_eq!(status, BatchStatus::Failed);
    assert_eq!(step.status, BatchStatus::Failed);
    assert_eq!(step.read_count, 10);
    assert_eq!(step.write_count, 0);
    assert_eq!(step.skip_count, 0);
    assert_eq!(step.rollback_count, 1);
    assert!(step
        .exit_status
        .description
        .contains("invalid ISBN on item 7"));
    assert!(sink.lock().is_empty());
    Ok(())
}

/// A write failure rolls back the failing chunk completely: counters reflect
/// only fully committed prior chunks.
#[tokio::test]
async fn test_write_failure_preserves_committed_counts() -> Result<()> {
    let sink = Arc::new(Mutex::new(Vec::new()));
    let writer = PoisonedWriter {
        poison: 8,
        error: ItemError::permanent("constraint violation on item 8"),
        sink: sink.clone(),
    };
    let chunk = ChunkStep::builder(5)
        .reader(|_| Box::new(VecReader::new((1..=12).collect())))
        .processor(Arc::new(FailOn {
            value: -1,
            error: ItemError::data("unused"),
        }))
        .writer(move |_| Box::new(writer.clone()))
        .build()?;

    let (status, step, _) = run_book_job(chunk).await?;
    assert_eq!(status, BatchStatus::Failed);
    // First chunk (1..=5) committed; second chunk (6..=10) rolled back.
    assert_eq!(step.read_count, 5);
    assert_eq!(step.write_count, 5);
    assert_eq!(step.commit_count, 1);
    assert_eq!(step.rollback_count, 1);
    assert_eq!(sink.lock().clone(), vec![1, 2, 3, 4, 5]);
    Ok(())
}

/// A skippable write failure shrinks the chunk to single-item writes and
/// skips only the poisoned item.
#[tokio::test]
async fn test_skippable_write_failure_isolates_item() -> Result<()> {
    let sink = Arc::new(Mutex::new(Vec::new()));
    let writer = PoisonedWriter {
        poison: 8,
        error: ItemError::data("constraint violation on item 8"),
        sink: sink.clone(),
    };
    let chunk = ChunkStep::builder(5)
        .reader(|_| Box::new(VecReader::new((1..=12).collect())))
        .processor(Arc::new(FailOn {
            value: -1,
            error: ItemError::data("unused"),
        }))
        .writer(move |_| Box::new(writer.clone()))
        .fault_tolerance(book_policy(5))
        .build()?;

    let (status, step, _) = run_book_job(chunk).await?;
    assert_eq!(status, BatchStatus::Completed);
    assert_eq!(step.read_count, 12);
    assert_eq!(step.write_count, 11);
    assert_eq!(step.skip_count, 1);
    let written = sink.lock().clone();
    assert!(!written.contains(&8));
    assert_eq!(written.len(), 11);
    Ok(())
}

/// Skip count stays within its configured limit even when more items fail
/// than the limit allows; the overflow fails the step instead.
#[tokio::test]
async fn test_skip_count_never_exceeds_limit() -> Result<()> {
    struct FailEvens;
    #[async_trait::async_trait]
    impl librarian_batch::job::ItemProcessor<i64, i64> for FailEvens {
        async fn process(&self, item: i64) -> std::result::Result<Option<i64>, ItemError> {
            if item % 2 == 0 {
                Err(ItemError::data(format!("bad record {item}")))
            } else {
                Ok(Some(item))
            }
        }
    }

    let (_, writer) = CollectingWriter::shared();
    let chunk = ChunkStep::builder(4)
        .reader(|_| Box::new(VecReader::new((1..=20).collect())))
        .processor(Arc::new(FailEvens))
        .writer(move |_| Box::new(writer.clone()))
        .fault_tolerance(book_policy(3))
        .build()?;

    let (status, step, _) = run_book_job(chunk).await?;
    assert_eq!(status, BatchStatus::Failed);
    assert!(step.skip_count <= 3);
    Ok(())
}
