#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

//! # Librarian Batch
//!
//! Batch job orchestration engine: multi-step jobs wired with exit-status
//! transitions, chunk-oriented fault-tolerant processing, partitioned
//! parallel execution, a durable execution record store, and a recovery
//! service for failed runs.
//!
//! ## Overview
//!
//! A **job** is a named graph of nodes. Each node is either a step (tasklet,
//! chunk-oriented, or partitioned) with a durable step execution record, or a
//! side-effect-free decider used purely for branching. The engine launches an
//! execution, drives the graph node by node, routes on each node's exit
//! status, and persists every state change to the store at commit
//! boundaries. Nothing is retried automatically at the job level; the
//! recovery service restarts failed executions on explicit request with full
//! back-reference lineage.
//!
//! ## Module Organization
//!
//! - [`model`] - executions, parameters, statuses, contexts, partitions
//! - [`job`] - definitions, flow control, registry, collaborator traits
//! - [`chunk`] - chunk processor with skip/retry fault tolerance
//! - [`partition`] - range partitioner and bounded worker pool
//! - [`store`] - execution record store (in-memory and Postgres)
//! - [`engine`] - launch validation and flow drive
//! - [`recovery`] - restart, skip/failure analysis, cooperative stop
//! - [`config`] / [`logging`] - process configuration and tracing setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use librarian_batch::config::BatchConfig;
//! use librarian_batch::engine::JobEngine;
//! use librarian_batch::job::{JobDefinition, JobRegistry};
//! use librarian_batch::model::JobParameters;
//! use librarian_batch::store::InMemoryStore;
//! use std::sync::Arc;
//!
//! # async fn example(cleanup: Arc<dyn librarian_batch::job::Tasklet>) -> librarian_batch::error::Result<()> {
//! let registry = Arc::new(JobRegistry::new());
//! registry.register(
//!     JobDefinition::builder("cleanupJob")
//!         .tasklet("cleanup", cleanup)
//!         .build()?,
//! );
//!
//! let engine = JobEngine::new(
//!     registry,
//!     Arc::new(InMemoryStore::new()),
//!     BatchConfig::default(),
//! );
//! let execution_id = engine
//!     .launch("cleanupJob", JobParameters::new().with_string("targetMonth", "2026-08"))
//!     .await?;
//! engine.join(execution_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod chunk;
pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod logging;
pub mod model;
pub mod partition;
pub mod recovery;
pub mod store;
pub mod test_support;

pub use config::BatchConfig;
pub use engine::JobEngine;
pub use error::{BatchError, Result};
pub use recovery::RecoveryService;
