//! # Job Definitions and Flow Control
//!
//! A job is a named, immutable graph of nodes (steps and deciders) wired with
//! exit-status-keyed transition rules. This module holds:
//!
//! - the collaborator traits domain code implements ([`ItemReader`],
//!   [`ItemProcessor`], [`ItemWriter`], [`Tasklet`], [`Decider`])
//! - the flow controller ([`FlowDefinition`])
//! - the definition builder and [`JobRegistry`]
//! - the [`StepRunner`] abstraction the engine drives

mod definition;
mod flow;
mod listener;
mod registry;
mod step;
mod traits;

pub use definition::{JobDefinition, JobDefinitionBuilder, Node};
pub use flow::{FlowDefinition, TransitionRule, WILDCARD};
pub use listener::{logging_listener, JobListener, LoggingJobListener};
pub use registry::JobRegistry;
pub use step::{StepEnv, StepRunner, StopFlag, TaskletStep};
pub use traits::{Decider, FailureClass, ItemError, ItemProcessor, ItemReader, ItemWriter, Tasklet};
