//! # Job Engine
//!
//! Owns the lifecycle of job executions: validates launch requests against
//! the registry and the store, creates the execution records, and drives the
//! flow graph node by node on a background task.
//!
//! ## Launch Protocol
//!
//! A launch resolves the job definition, derives the instance identity from
//! the identifying parameters, and refuses to run when another execution of
//! the same instance is active or when the instance already completed with
//! those parameters. On success the flow drive is spawned and the new
//! execution id is returned immediately; callers observe progress through the
//! store or block on [`JobEngine::join`].
//!
//! ## Flow Drive
//!
//! Each node produces an exit status. Steps get a durable step execution
//! record whose context is seeded from the job-level context and merged back
//! when the node finishes; deciders produce a status only. The flow
//! controller routes on the exit status (a failed step routes through its
//! FAILED rules before the job gives up), and the job's terminal status is
//! derived from the status in hand when no rule matches. The engine never
//! retries a node on its own; re-running is the recovery service's job.

use crate::config::BatchConfig;
use crate::error::{BatchError, Result};
use crate::job::{JobDefinition, JobRegistry, Node, StepEnv, StopFlag};
use crate::model::{
    BatchStatus, ExitStatus, JobExecution, JobInstance, JobParameters, StepExecution,
};
use crate::store::ExecutionStore;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

struct RunningJob {
    stop: StopFlag,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Launches and drives job executions. Cheap to clone behind an `Arc`; one
/// engine per process is the expected shape.
pub struct JobEngine {
    registry: Arc<JobRegistry>,
    store: Arc<dyn ExecutionStore>,
    config: BatchConfig,
    // Shared with each drive task, which drops its own entry when it
    // finishes; callers that never join still see the map drain.
    running: Arc<DashMap<i64, Arc<RunningJob>>>,
}

impl JobEngine {
    pub fn new(
        registry: Arc<JobRegistry>,
        store: Arc<dyn ExecutionStore>,
        config: BatchConfig,
    ) -> Self {
        Self {
            registry,
            store,
            config,
            running: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn ExecutionStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Launch a job by name. Returns the new execution id as soon as the
    /// records exist and the drive task is spawned.
    pub async fn launch(&self, job_name: &str, parameters: JobParameters) -> Result<i64> {
        self.launch_inner(job_name, parameters, None).await
    }

    /// Launch a restart attempt linked back to the execution it supersedes.
    pub async fn launch_restart(
        &self,
        job_name: &str,
        parameters: JobParameters,
        restart_of: i64,
    ) -> Result<i64> {
        self.launch_inner(job_name, parameters, Some(restart_of))
            .await
    }

    async fn launch_inner(
        &self,
        job_name: &str,
        parameters: JobParameters,
        restart_of: Option<i64>,
    ) -> Result<i64> {
        let definition = self.registry.get(job_name)?;
        let identity = parameters.identity_key();
        let instance = self.store.find_or_create_instance(job_name, &identity).await?;

        let prior = self
            .store
            .executions_for_instance(instance.instance_id)
            .await?;
        if prior.iter().any(|e| e.status.is_running()) {
            return Err(BatchError::AlreadyRunning {
                job_name: job_name.to_string(),
                identity,
            });
        }
        if prior.iter().any(|e| e.status == BatchStatus::Completed) {
            return Err(BatchError::AlreadyComplete {
                job_name: job_name.to_string(),
                identity,
            });
        }

        let execution = self
            .store
            .create_execution(&instance, parameters, restart_of)
            .await?;
        let execution_id = execution.execution_id;
        info!(
            job_name,
            execution_id,
            instance_id = instance.instance_id,
            restart_of,
            "Launching job execution"
        );

        let stop = StopFlag::new();
        let entry = Arc::new(RunningJob {
            stop: stop.clone(),
            handle: Mutex::new(None),
        });
        self.running.insert(execution_id, entry.clone());

        let drive = FlowDrive {
            definition,
            store: self.store.clone(),
            stop,
            worker_pool_size: self.config.worker_pool_size,
        };
        let running = self.running.clone();
        let handle = tokio::spawn(async move {
            drive.run(execution).await;
            // Terminal status is already persisted; the tracking entry is
            // no longer needed unless a join() got to it first.
            running.remove(&execution_id);
        });
        *entry.handle.lock().await = Some(handle);
        Ok(execution_id)
    }

    /// Signal a cooperative stop to a running execution's drive task.
    /// Observed between nodes, between chunks, and between partition
    /// dispatches; committed work is never undone.
    pub fn signal_stop(&self, execution_id: i64) -> bool {
        match self.running.get(&execution_id) {
            Some(entry) => {
                entry.stop.request();
                true
            }
            None => false,
        }
    }

    /// Wait for an execution's drive task to finish. A no-op for executions
    /// that already finished, or that this engine never ran.
    pub async fn join(&self, execution_id: i64) -> Result<()> {
        let Some((_, entry)) = self.running.remove(&execution_id) else {
            return Ok(());
        };
        let handle = entry.handle.lock().await.take();
        if let Some(handle) = handle {
            if let Err(join_err) = handle.await {
                error!(execution_id, error = %join_err, "Flow drive task panicked");
            }
        }
        Ok(())
    }

    // Store pass-throughs used by operational tooling.

    pub async fn execution(&self, execution_id: i64) -> Result<JobExecution> {
        self.store
            .execution(execution_id)
            .await?
            .ok_or(BatchError::ExecutionNotFound(execution_id))
    }

    pub async fn step_executions(&self, execution_id: i64) -> Result<Vec<StepExecution>> {
        Ok(self.store.step_executions(execution_id).await?)
    }

    pub async fn instances(
        &self,
        job_name: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<JobInstance>> {
        Ok(self.store.instances(job_name, offset, limit).await?)
    }

    pub async fn running_executions(&self, job_name: &str) -> Result<Vec<JobExecution>> {
        Ok(self.store.running_executions(job_name).await?)
    }

    pub fn job_names(&self) -> Vec<String> {
        self.registry.job_names()
    }
}

/// State moved onto the background task that walks one execution through the
/// job graph.
struct FlowDrive {
    definition: Arc<JobDefinition>,
    store: Arc<dyn ExecutionStore>,
    stop: StopFlag,
    worker_pool_size: usize,
}

impl FlowDrive {
    async fn run(self, mut execution: JobExecution) {
        execution.status = BatchStatus::Started;
        execution.start_time = Some(chrono::Utc::now());
        if let Err(err) = self.store.update_execution(&execution).await {
            error!(
                execution_id = execution.execution_id,
                error = %err,
                "Could not mark execution started"
            );
            return;
        }
        for listener in self.definition.listeners() {
            listener.before_job(&execution).await;
        }

        let final_exit = self.walk(&mut execution).await;

        execution.status = match final_exit.code.as_str() {
            ExitStatus::STOPPED => BatchStatus::Stopped,
            ExitStatus::FAILED => BatchStatus::Failed,
            _ => BatchStatus::Completed,
        };
        execution.exit_status = final_exit;
        execution.end_time = Some(chrono::Utc::now());
        if let Err(err) = self.store.update_execution(&execution).await {
            error!(
                execution_id = execution.execution_id,
                error = %err,
                "Could not persist terminal execution status"
            );
        }

        let steps = self
            .store
            .step_executions(execution.execution_id)
            .await
            .unwrap_or_default();
        for listener in self.definition.listeners() {
            listener.after_job(&execution, &steps).await;
        }
    }

    /// Walk the graph from the start node; returns the exit status in hand
    /// when the flow terminates.
    async fn walk(&self, execution: &mut JobExecution) -> ExitStatus {
        let mut current = self.definition.start_node().to_string();
        loop {
            if self.stop.is_requested() {
                info!(
                    execution_id = execution.execution_id,
                    node = %current,
                    "Stop requested, ending execution before node"
                );
                return ExitStatus::stopped().with_description("stop requested between nodes");
            }

            let node = match self.definition.node(&current) {
                Some(node) => node.clone(),
                None => {
                    // Unreachable for built definitions; the builder
                    // validates every transition endpoint.
                    error!(node = %current, "Flow routed to undeclared node");
                    return ExitStatus::failed()
                        .with_description(format!("undeclared node '{current}'"));
                }
            };

            let exit = match node {
                Node::Decider(decider) => {
                    let exit = decider.decide(execution).await;
                    info!(
                        execution_id = execution.execution_id,
                        node = %current,
                        decision = %exit.code,
                        "Decider evaluated"
                    );
                    exit
                }
                Node::Step(runner) => self.run_step(execution, &current, runner).await,
            };

            if exit.code == ExitStatus::STOPPED {
                return exit;
            }
            match self.definition.flow().resolve(&current, &exit.code) {
                Some(next) => {
                    current = next.to_string();
                }
                None => return exit,
            }
        }
    }

    async fn run_step(
        &self,
        execution: &mut JobExecution,
        step_name: &str,
        runner: Arc<dyn crate::job::StepRunner>,
    ) -> ExitStatus {
        let mut step = match self
            .store
            .create_step_execution(execution.execution_id, step_name)
            .await
        {
            Ok(step) => step,
            Err(err) => {
                error!(step_name, error = %err, "Could not create step execution");
                return ExitStatus::failed().with_description(err.to_string());
            }
        };
        step.status = BatchStatus::Started;
        step.start_time = Some(chrono::Utc::now());
        step.context = execution.context.clone();
        if let Err(err) = self.store.update_step_execution(&step).await {
            error!(step_name, error = %err, "Could not mark step started");
            return ExitStatus::failed().with_description(err.to_string());
        }

        let env = StepEnv {
            store: self.store.clone(),
            job_execution: execution.clone(),
            stop: self.stop.clone(),
            worker_pool_size: self.worker_pool_size,
        };
        let exit = match runner.run(&mut step, &env).await {
            Ok(exit) => {
                step.status = match exit.code.as_str() {
                    ExitStatus::STOPPED => BatchStatus::Stopped,
                    // A FAILED exit from a runner that returned Ok is a
                    // routing signal, not a step crash.
                    _ => BatchStatus::Completed,
                };
                exit
            }
            Err(err) => {
                warn!(
                    execution_id = execution.execution_id,
                    step_name,
                    error = %err,
                    "Step failed"
                );
                step.status = BatchStatus::Failed;
                ExitStatus::failed().with_description(err.to_string())
            }
        };
        step.exit_status = exit.clone();
        step.end_time = Some(chrono::Utc::now());
        // The step's context writes become visible to downstream nodes.
        execution.context.merge(&step.context);
        if let Err(err) = self.store.update_step_execution(&step).await {
            error!(step_name, error = %err, "Could not persist step result");
            return ExitStatus::failed().with_description(err.to_string());
        }
        if let Err(err) = self.store.update_execution(execution).await {
            error!(step_name, error = %err, "Could not persist job context");
            return ExitStatus::failed().with_description(err.to_string());
        }
        exit
    }
}
