//! Shared fixtures for the integration suites: an engine over the in-memory
//! store, recording tasklets, and fault-injecting chunk collaborators.
#![allow(dead_code)]

use async_trait::async_trait;
use librarian_batch::config::BatchConfig;
use librarian_batch::engine::JobEngine;
use librarian_batch::error::Result;
use librarian_batch::job::{
    Decider, ItemError, ItemProcessor, ItemWriter, JobRegistry, Tasklet,
};
use librarian_batch::model::{BatchStatus, ExecutionContext, ExitStatus, JobExecution};
use librarian_batch::store::{ExecutionStore, InMemoryStore};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub fn test_engine(registry: Arc<JobRegistry>) -> (Arc<JobEngine>, Arc<InMemoryStore>) {
    engine_with_config(registry, BatchConfig::default())
}

pub fn engine_with_config(
    registry: Arc<JobRegistry>,
    config: BatchConfig,
) -> (Arc<JobEngine>, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(JobEngine::new(registry, store.clone(), config));
    (engine, store)
}

/// Poll the store until the execution reaches `status`. Panics after five
/// seconds so a wedged drive fails the test instead of hanging it.
pub async fn wait_for_status(store: &Arc<InMemoryStore>, execution_id: i64, status: BatchStatus) {
    for _ in 0..500 {
        let execution = store
            .execution(execution_id)
            .await
            .expect("store read")
            .expect("execution exists");
        if execution.status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution {execution_id} never reached {status}");
}

/// Outcome a scripted node produces when it runs.
#[derive(Clone)]
pub enum Outcome {
    Exit(ExitStatus),
    Fail(String),
}

/// Tasklet that records its label in a shared log and produces a scripted
/// outcome, for asserting which nodes of a flow actually ran.
pub struct ScriptedTasklet {
    pub label: String,
    pub log: Arc<Mutex<Vec<String>>>,
    pub outcome: Outcome,
}

impl ScriptedTasklet {
    pub fn completing(label: &str, log: &Arc<Mutex<Vec<String>>>) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            log: log.clone(),
            outcome: Outcome::Exit(ExitStatus::completed()),
        })
    }

    pub fn failing(label: &str, log: &Arc<Mutex<Vec<String>>>, message: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            log: log.clone(),
            outcome: Outcome::Fail(message.to_string()),
        })
    }
}

#[async_trait]
impl Tasklet for ScriptedTasklet {
    async fn execute(
        &self,
        _execution: &JobExecution,
        _context: &mut ExecutionContext,
    ) -> Result<ExitStatus> {
        self.log.lock().push(self.label.clone());
        match &self.outcome {
            Outcome::Exit(exit) => Ok(exit.clone()),
            Outcome::Fail(message) => Err(librarian_batch::BatchError::StepFailed {
                step_name: self.label.clone(),
                message: message.clone(),
            }),
        }
    }
}

/// Decider routing on a `rowCount` launch parameter: under 1000 rows is
/// light processing, anything else heavy.
pub struct VolumeDecider;

pub const LIGHT_PROCESSING: &str = "LIGHT_PROCESSING";
pub const HEAVY_PROCESSING: &str = "HEAVY_PROCESSING";

#[async_trait]
impl Decider for VolumeDecider {
    async fn decide(&self, execution: &JobExecution) -> ExitStatus {
        let rows = execution.parameters.get_long("rowCount").unwrap_or(0);
        if rows < 1000 {
            ExitStatus::new(LIGHT_PROCESSING)
        } else {
            ExitStatus::new(HEAVY_PROCESSING)
        }
    }
}

/// Processor that fails deterministically on one value and passes everything
/// else through.
pub struct FailOn {
    pub value: i64,
    pub error: ItemError,
}

#[async_trait]
impl ItemProcessor<i64, i64> for FailOn {
    async fn process(&self, item: i64) -> std::result::Result<Option<i64>, ItemError> {
        if item == self.value {
            Err(self.error.clone())
        } else {
            Ok(Some(item))
        }
    }
}

/// Writer that rejects any batch containing a poison value and collects
/// everything else.
pub struct PoisonedWriter {
    pub poison: i64,
    pub error: ItemError,
    pub sink: Arc<Mutex<Vec<i64>>>,
}

impl Clone for PoisonedWriter {
    fn clone(&self) -> Self {
        Self {
            poison: self.poison,
            error: self.error.clone(),
            sink: self.sink.clone(),
        }
    }
}

#[async_trait]
impl ItemWriter<i64> for PoisonedWriter {
    async fn write(&mut self, items: &[i64]) -> std::result::Result<(), ItemError> {
        if items.contains(&self.poison) {
            return Err(self.error.clone());
        }
        self.sink.lock().extend_from_slice(items);
        Ok(())
    }
}
