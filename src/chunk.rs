//! # Chunk Processor
//!
//! Executes one step as a sequence of chunks: pull up to `chunk_size` items
//! from the reader, run each through the processor, write the survivors as
//! one atomic unit, then commit the updated counters to the execution record
//! store. Counters change only at commit boundaries - an aborted chunk leaves
//! the step's write count exactly where the last commit put it.
//!
//! Fault tolerance is per step: a retryable item failure re-attempts the item
//! (items before it are not re-read) up to the retry limit; an exhausted or
//! non-retryable failure falls through to the skip policy; an exhausted skip
//! policy fails the step with the triggering failure's message as exit
//! description.

use crate::error::{BatchError, Result};
use crate::job::{
    FailureClass, ItemError, ItemProcessor, ItemReader, ItemWriter, StepEnv, StepRunner,
};
use crate::model::{ExecutionContext, ExitStatus, StepExecution};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Which failure classes a policy clause applies to. Declaring a clause
/// generically (`All`) matches every failure, mirroring `skip(Exception)` /
/// `retry(Exception)` style configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ClassFilter {
    #[default]
    All,
    None,
    Only(Vec<FailureClass>),
}

impl ClassFilter {
    pub fn matches(&self, class: FailureClass) -> bool {
        match self {
            Self::All => true,
            Self::None => false,
            Self::Only(classes) => classes.contains(&class),
        }
    }
}

/// Per-step fault-tolerance policy.
///
/// `retry_limit` bounds the total attempts per item (a limit of 3 means one
/// initial attempt plus two retries); `skip_limit` bounds the cumulative
/// skips over the whole step execution. The default policy tolerates
/// nothing: any item failure fails the step.
#[derive(Debug, Clone, Default)]
pub struct FaultTolerance {
    pub skip_limit: u64,
    pub retry_limit: u32,
    pub retryable: ClassFilter,
    pub skippable: ClassFilter,
}

impl FaultTolerance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_limit(mut self, limit: u64) -> Self {
        self.skip_limit = limit;
        self
    }

    pub fn retry_limit(mut self, limit: u32) -> Self {
        self.retry_limit = limit;
        self
    }

    pub fn retry_on(mut self, filter: ClassFilter) -> Self {
        self.retryable = filter;
        self
    }

    pub fn skip_on(mut self, filter: ClassFilter) -> Self {
        self.skippable = filter;
        self
    }

    fn is_retryable(&self, error: &ItemError) -> bool {
        self.retryable.matches(error.class)
    }

    fn is_skippable(&self, error: &ItemError) -> bool {
        self.skippable.matches(error.class)
    }
}

/// Builds a reader for one step execution from its context. Partition ranges
/// and restart markers arrive through the context, the way step-scoped
/// readers are parameterized.
pub type ReaderFactory<I> =
    Arc<dyn Fn(&ExecutionContext) -> Box<dyn ItemReader<I>> + Send + Sync>;
/// Builds a writer for one step execution from its context.
pub type WriterFactory<O> =
    Arc<dyn Fn(&ExecutionContext) -> Box<dyn ItemWriter<O>> + Send + Sync>;

/// A chunk-oriented step: reader -> processor -> writer with a
/// [`FaultTolerance`] policy, committed every `chunk_size` items.
pub struct ChunkStep<I, O> {
    chunk_size: usize,
    policy: FaultTolerance,
    reader: ReaderFactory<I>,
    processor: Arc<dyn ItemProcessor<I, O>>,
    writer: WriterFactory<O>,
}

impl<I, O> ChunkStep<I, O>
where
    I: Clone + Send + 'static,
    O: Send + Sync + 'static,
{
    pub fn builder(chunk_size: usize) -> ChunkStepBuilder<I, O> {
        ChunkStepBuilder {
            chunk_size,
            policy: FaultTolerance::default(),
            reader: None,
            processor: None,
            writer: None,
        }
    }
}

pub struct ChunkStepBuilder<I, O> {
    chunk_size: usize,
    policy: FaultTolerance,
    reader: Option<ReaderFactory<I>>,
    processor: Option<Arc<dyn ItemProcessor<I, O>>>,
    writer: Option<WriterFactory<O>>,
}

impl<I, O> ChunkStepBuilder<I, O>
where
    I: Clone + Send + 'static,
    O: Send + Sync + 'static,
{
    pub fn reader<F>(mut self, factory: F) -> Self
    where
        F: Fn(&ExecutionContext) -> Box<dyn ItemReader<I>> + Send + Sync + 'static,
    {
        self.reader = Some(Arc::new(factory));
        self
    }

    pub fn processor(mut self, processor: Arc<dyn ItemProcessor<I, O>>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn writer<F>(mut self, factory: F) -> Self
    where
        F: Fn(&ExecutionContext) -> Box<dyn ItemWriter<O>> + Send + Sync + 'static,
    {
        self.writer = Some(Arc::new(factory));
        self
    }

    pub fn fault_tolerance(mut self, policy: FaultTolerance) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> Result<ChunkStep<I, O>> {
        if self.chunk_size == 0 {
            return Err(BatchError::Configuration(
                "chunk size must be at least 1".to_string(),
            ));
        }
        Ok(ChunkStep {
            chunk_size: self.chunk_size,
            policy: self.policy,
            reader: self
                .reader
                .ok_or_else(|| BatchError::Configuration("chunk step has no reader".to_string()))?,
            processor: self.processor.ok_or_else(|| {
                BatchError::Configuration("chunk step has no processor".to_string())
            })?,
            writer: self
                .writer
                .ok_or_else(|| BatchError::Configuration("chunk step has no writer".to_string()))?,
        })
    }
}

/// Outcome of pushing one item through the processor under the policy.
enum ProcessOutcome<O> {
    Output(O),
    Filtered,
    Skipped(ItemError),
}

// Written chunks are borrowed across writer awaits, so outputs must be Sync
// for the step future to stay Send.
impl<I, O> ChunkStep<I, O>
where
    I: Clone + Send + 'static,
    O: Send + Sync + 'static,
{
    async fn process_item(
        &self,
        item: I,
        skips_so_far: u64,
    ) -> std::result::Result<ProcessOutcome<O>, ItemError> {
        let mut attempt: u32 = 1;
        loop {
            match self.processor.process(item.clone()).await {
                Ok(Some(output)) => return Ok(ProcessOutcome::Output(output)),
                Ok(None) => return Ok(ProcessOutcome::Filtered),
                Err(error) => {
                    if self.policy.is_retryable(&error) && attempt < self.policy.retry_limit {
                        attempt += 1;
                        debug!(attempt, error = %error, "Retrying item after processing failure");
                        continue;
                    }
                    if self.policy.is_skippable(&error) && skips_so_far < self.policy.skip_limit {
                        warn!(error = %error, "Skipping item after processing failure");
                        return Ok(ProcessOutcome::Skipped(error));
                    }
                    return Err(error);
                }
            }
        }
    }

    /// Write the chunk's surviving items. On a retry-exhausted but skippable
    /// write failure the chunk shrinks to single-item writes to isolate the
    /// failing item; items that still fail are skipped within the limit.
    /// Returns (items written, skips incurred during the write).
    async fn write_chunk(
        &self,
        writer: &mut Box<dyn ItemWriter<O>>,
        outputs: &[O],
        skips_so_far: u64,
        failures: &mut Vec<String>,
    ) -> std::result::Result<(u64, u64), ItemError> {
        let mut attempt: u32 = 1;
        loop {
            match writer.write(outputs).await {
                Ok(()) => return Ok((outputs.len() as u64, 0)),
                Err(error) => {
                    if self.policy.is_retryable(&error) && attempt < self.policy.retry_limit {
                        attempt += 1;
                        debug!(attempt, error = %error, "Retrying chunk write");
                        continue;
                    }
                    // Isolation is only worth entering with skip budget
                    // left; otherwise the first failing item aborts anyway.
                    if !self.policy.is_skippable(&error) || skips_so_far >= self.policy.skip_limit {
                        return Err(error);
                    }
                    // Isolate the failing item with single-item writes.
                    let mut written: u64 = 0;
                    let mut skipped: u64 = 0;
                    for output in outputs {
                        match writer.write(std::slice::from_ref(output)).await {
                            Ok(()) => written += 1,
                            Err(item_error) => {
                                if self.policy.is_skippable(&item_error)
                                    && skips_so_far + skipped < self.policy.skip_limit
                                {
                                    warn!(error = %item_error, "Skipping item after write failure");
                                    failures.push(item_error.message.clone());
                                    skipped += 1;
                                } else {
                                    return Err(item_error);
                                }
                            }
                        }
                    }
                    return Ok((written, skipped));
                }
            }
        }
    }

    fn step_failure(step: &StepExecution, error: &ItemError) -> BatchError {
        BatchError::StepFailed {
            step_name: step.step_name.clone(),
            message: error.message.clone(),
        }
    }
}

#[async_trait]
impl<I, O> StepRunner for ChunkStep<I, O>
where
    I: Clone + Send + 'static,
    O: Send + Sync + 'static,
{
    async fn run(&self, step: &mut StepExecution, env: &StepEnv) -> Result<ExitStatus> {
        let mut reader = (self.reader)(&step.context);
        let mut writer = (self.writer)(&step.context);

        loop {
            if env.stop.is_requested() {
                debug!(step_name = %step.step_name, "Stop requested, exiting between chunks");
                return Ok(ExitStatus::stopped()
                    .with_description("stop requested between chunks"));
            }

            // Read phase.
            let mut items = Vec::with_capacity(self.chunk_size);
            while items.len() < self.chunk_size {
                match reader.read().await {
                    Ok(Some(item)) => items.push(item),
                    Ok(None) => break,
                    Err(error) => {
                        // Reader failures are step-fatal; nothing from this
                        // chunk is committed.
                        step.rollback_count += 1;
                        step.failure_messages.push(error.message.clone());
                        persist_best_effort(step, env).await;
                        return Err(Self::step_failure(step, &error));
                    }
                }
            }
            if items.is_empty() {
                // End of data; a reader empty on the very first pull ends
                // the step successfully with zero processed.
                break;
            }
            let reads = items.len() as u64;

            // Process phase.
            let mut outputs = Vec::with_capacity(items.len());
            let mut chunk_skips: u64 = 0;
            let mut chunk_filtered: u64 = 0;
            let mut chunk_failures: Vec<String> = Vec::new();
            let mut abort: Option<ItemError> = None;
            for item in items {
                match self.process_item(item, step.skip_count + chunk_skips).await {
                    Ok(ProcessOutcome::Output(output)) => outputs.push(output),
                    Ok(ProcessOutcome::Filtered) => chunk_filtered += 1,
                    Ok(ProcessOutcome::Skipped(error)) => {
                        chunk_skips += 1;
                        chunk_failures.push(error.message.clone());
                    }
                    Err(error) => {
                        abort = Some(error);
                        break;
                    }
                }
            }
            if let Some(error) = abort {
                // The chunk rolls back, but the reads did happen and are
                // reflected on the failed step record.
                step.read_count += reads;
                step.rollback_count += 1;
                step.failure_messages.push(error.message.clone());
                persist_best_effort(step, env).await;
                return Err(Self::step_failure(step, &error));
            }

            // Write phase. An all-filtered chunk still commits as an empty
            // write so read counts advance.
            let (written, write_skips) = match self
                .write_chunk(
                    &mut writer,
                    &outputs,
                    step.skip_count + chunk_skips,
                    &mut chunk_failures,
                )
                .await
            {
                Ok(counts) => counts,
                Err(error) => {
                    // Write failure rolls the whole chunk back: neither the
                    // reads nor any partial writes are committed.
                    step.rollback_count += 1;
                    step.failure_messages.push(error.message.clone());
                    persist_best_effort(step, env).await;
                    return Err(Self::step_failure(step, &error));
                }
            };

            // Commit. Counter deltas are applied to a copy first so a store
            // failure leaves the in-memory record consistent with the last
            // successful commit.
            let mut committed = step.clone();
            committed.read_count += reads;
            committed.write_count += written;
            committed.filter_count += chunk_filtered;
            committed.skip_count += chunk_skips + write_skips;
            committed.commit_count += 1;
            committed.failure_messages.extend(chunk_failures);
            match env.store.update_step_execution(&committed).await {
                Ok(()) => {
                    debug!(
                        step_name = %committed.step_name,
                        read_count = committed.read_count,
                        write_count = committed.write_count,
                        skip_count = committed.skip_count,
                        commit_count = committed.commit_count,
                        "Chunk committed"
                    );
                    *step = committed;
                }
                Err(error) => {
                    step.rollback_count += 1;
                    return Err(BatchError::StepFailed {
                        step_name: step.step_name.clone(),
                        message: format!("chunk commit failed: {error}"),
                    });
                }
            }
        }

        Ok(ExitStatus::completed())
    }
}

/// Persist a failed step's rollback/failure bookkeeping without masking the
/// failure that is about to propagate.
async fn persist_best_effort(step: &StepExecution, env: &StepEnv) {
    if let Err(error) = env.store.update_step_execution(step).await {
        warn!(
            step_name = %step.step_name,
            error = %error,
            "Could not persist step state after failure"
        );
    }
}
