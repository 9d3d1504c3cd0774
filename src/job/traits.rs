//! Collaborator-supplied interfaces consumed by the engine.
//!
//! Domain logic plugs into a step through these traits: a chunk-oriented step
//! needs a reader, processor and writer; a single-action node needs a
//! [`Tasklet`]; branching nodes need a [`Decider`].

use crate::error::Result;
use crate::model::{ExecutionContext, ExitStatus, JobExecution};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of an item-level failure, used by the skip/retry policy to
/// decide whether a failure is retryable and/or skippable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// May succeed on retry (lock contention, temporary resource pressure)
    Transient,
    /// Bad input data; retrying the same item cannot succeed
    Data,
    /// Connectivity problem talking to an external system
    Connectivity,
    /// Will never succeed; not worth retrying or skipping
    Permanent,
}

/// An item-level failure during reading, processing or writing.
///
/// These never propagate directly; the chunk processor absorbs them up to the
/// step's skip/retry limits and converts the overflow into a step failure.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ItemError {
    pub message: String,
    pub class: FailureClass,
}

impl ItemError {
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            class,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Transient, message)
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Data, message)
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Connectivity, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Permanent, message)
    }
}

/// Sequential item source for a chunk-oriented step. `Ok(None)` signals
/// end-of-data.
#[async_trait]
pub trait ItemReader<I>: Send {
    async fn read(&mut self) -> std::result::Result<Option<I>, ItemError>;
}

/// Per-item transformation. `Ok(None)` filters the item out: it is neither
/// written nor counted as a skip.
#[async_trait]
pub trait ItemProcessor<I, O>: Send + Sync {
    async fn process(&self, item: I) -> std::result::Result<Option<O>, ItemError>;
}

/// Writes one chunk's surviving items as a single atomic unit.
#[async_trait]
pub trait ItemWriter<O>: Send {
    async fn write(&mut self, items: &[O]) -> std::result::Result<(), ItemError>;
}

/// Single-action node. Runs once per step execution; the context is the
/// step's own (seeded from the job-level context) and writes to it are merged
/// back when the step finishes.
#[async_trait]
pub trait Tasklet: Send + Sync {
    async fn execute(
        &self,
        execution: &JobExecution,
        context: &mut ExecutionContext,
    ) -> Result<ExitStatus>;
}

/// Branching node: evaluates a runtime condition and returns a status used
/// purely for flow routing. Must be idempotent and side-effect-free; no step
/// execution record is created for a decider.
#[async_trait]
pub trait Decider: Send + Sync {
    async fn decide(&self, execution: &JobExecution) -> ExitStatus;
}
