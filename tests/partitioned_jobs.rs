//! Partitioned steps through the engine: disjoint slices, child step
//! records, bounded concurrency, and failure isolation between siblings.

mod common;

use anyhow::Result;
use common::{engine_with_config, test_engine, FailOn};
use librarian_batch::chunk::ChunkStep;
use librarian_batch::config::BatchConfig;
use librarian_batch::job::{ItemError, ItemProcessor, ItemReader, JobDefinition, JobRegistry};
use librarian_batch::model::{
    partition_result_key, BatchStatus, ExecutionContext, JobParameters, RANGE_END_KEY,
    RANGE_START_KEY,
};
use librarian_batch::partition::{PartitionedStep, Partitioner, RangePartitioner, StaticKeyRange};
use librarian_batch::store::ExecutionStore;
use librarian_batch::test_support::{CollectingWriter, VecReader};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const STEP: &str = "processBooks";

fn range_reader(context: &ExecutionContext) -> Box<dyn ItemReader<i64>> {
    let start = context.get_i64(RANGE_START_KEY).unwrap_or(0);
    let end = context.get_i64(RANGE_END_KEY).unwrap_or(-1);
    Box::new(VecReader::new((start..=end).collect()))
}

fn pass_through() -> Arc<FailOn> {
    Arc::new(FailOn {
        value: i64::MIN,
        error: ItemError::data("unused"),
    })
}

fn partitioned_job(
    processor: Arc<dyn ItemProcessor<i64, i64>>,
    writer: CollectingWriter<i64>,
    min: i64,
    max: i64,
) -> JobDefinition {
    let worker = ChunkStep::builder(10)
        .reader(range_reader)
        .processor(processor)
        .writer(move |_| Box::new(writer.clone()))
        .build()
        .expect("valid worker step");
    let manager = PartitionedStep::new(
        4,
        Arc::new(RangePartitioner::new(Arc::new(StaticKeyRange(min, max)))),
        Arc::new(worker),
    );
    JobDefinition::builder("parallelPartitionedJob")
        .step(STEP, Arc::new(manager))
        .build()
        .expect("valid job")
}

/// min=1, max=10, grid=4: every key is processed exactly once and the child
/// records carry the aggregate back to the manager.
#[tokio::test]
async fn test_partitions_cover_key_space_exactly_once() -> Result<()> {
    let (sink, writer) = CollectingWriter::shared();
    let registry = Arc::new(JobRegistry::new());
    registry.register(partitioned_job(pass_through(), writer, 1, 10));
    let (engine, store) = test_engine(registry);

    let execution_id = engine
        .launch("parallelPartitionedJob", JobParameters::new())
        .await?;
    engine.join(execution_id).await?;

    let mut written = sink.lock().clone();
    written.sort_unstable();
    assert_eq!(written, (1..=10).collect::<Vec<_>>());

    let steps = store.step_executions(execution_id).await?;
    let manager = steps.iter().find(|s| s.step_name == STEP).unwrap();
    assert_eq!(manager.status, BatchStatus::Completed);
    assert_eq!(manager.read_count, 10);
    assert_eq!(manager.write_count, 10);

    let mut children: Vec<&str> = steps
        .iter()
        .filter(|s| s.step_name != STEP)
        .map(|s| s.step_name.as_str())
        .collect();
    children.sort_unstable();
    assert_eq!(
        children,
        vec![
            "processBooks:partition0",
            "processBooks:partition1",
            "processBooks:partition2",
            "processBooks:partition3",
        ]
    );
    for partition_id in 0..4 {
        let key = partition_result_key(execution_id, partition_id);
        assert!(manager.context.get(&key).is_some(), "missing {key}");
    }
    Ok(())
}

/// A failing partition does not cancel its siblings: their slices are fully
/// written and the manager aggregates FAILED.
#[tokio::test]
async fn test_partition_failure_does_not_cancel_siblings() -> Result<()> {
    let (sink, writer) = CollectingWriter::shared();
    let registry = Arc::new(JobRegistry::new());
    registry.register(partitioned_job(
        Arc::new(FailOn {
            value: 5,
            error: ItemError::permanent("corrupt record 5"),
        }),
        writer,
        1,
        10,
    ));
    let (engine, store) = test_engine(registry);

    let execution_id = engine
        .launch("parallelPartitionedJob", JobParameters::new())
        .await?;
    engine.join(execution_id).await?;

    let execution = store.execution(execution_id).await?.unwrap();
    assert_eq!(execution.status, BatchStatus::Failed);
    assert!(execution.exit_status.description.contains("partition2"));

    // Partition 2 covers [5,6]; everything else was written.
    let mut written = sink.lock().clone();
    written.sort_unstable();
    assert_eq!(written, vec![1, 2, 3, 4, 7, 8, 9, 10]);

    let steps = store.step_executions(execution_id).await?;
    for step in steps.iter().filter(|s| s.step_name != STEP) {
        if step.step_name.ends_with("partition2") {
            assert_eq!(step.status, BatchStatus::Failed);
        } else {
            assert_eq!(step.status, BatchStatus::Completed);
        }
    }
    Ok(())
}

/// The worker pool bounds how many partitions run at once.
#[tokio::test]
async fn test_worker_pool_bounds_concurrency() -> Result<()> {
    struct TrackingProcessor {
        current: AtomicUsize,
        peak: AtomicUsize,
    }
    #[async_trait::async_trait]
    impl ItemProcessor<i64, i64> for TrackingProcessor {
        async fn process(&self, item: i64) -> std::result::Result<Option<i64>, ItemError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(Some(item))
        }
    }

    let processor = Arc::new(TrackingProcessor {
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let (_, writer) = CollectingWriter::shared();
    let registry = Arc::new(JobRegistry::new());
    registry.register(partitioned_job(processor.clone(), writer, 1, 40));
    let (engine, _) = engine_with_config(
        registry,
        BatchConfig {
            worker_pool_size: 2,
            ..BatchConfig::default()
        },
    );

    let execution_id = engine
        .launch("parallelPartitionedJob", JobParameters::new())
        .await?;
    engine.join(execution_id).await?;

    assert!(processor.peak.load(Ordering::SeqCst) <= 2);
    Ok(())
}

proptest! {
    /// For any key domain and grid size, the partition ranges are contiguous,
    /// non-overlapping, and cover exactly [min, max].
    #[test]
    fn prop_partition_ranges_are_disjoint_and_complete(
        min in -10_000i64..10_000,
        span in 0i64..50_000,
        grid in 1usize..32,
    ) {
        let max = min + span;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        let descriptors = runtime.block_on(async {
            RangePartitioner::new(Arc::new(StaticKeyRange(min, max)))
                .partition(grid)
                .await
                .expect("partitioning succeeds")
        });

        let mut next = min;
        for descriptor in &descriptors {
            let (start, end) = descriptor.range().expect("range context");
            prop_assert_eq!(start, next);
            prop_assert!(end >= start);
            next = end + 1;
        }
        prop_assert_eq!(next, max + 1);
        prop_assert!(descriptors.len() <= grid);
    }
}
