//! In-memory execution store and statistics sink.
//!
//! Backed by dashmap so concurrent partitions can commit counters without a
//! global lock. The id sequences are process-local; records do not survive a
//! restart of the process, which is fine for tests and for embedded use where
//! the Postgres store is not configured.

use super::{ExecutionStore, StatisticsSink, StoreError, StoreResult};
use crate::model::{
    BatchStatus, ExecutionContext, ExitStatus, JobExecution, JobInstance, JobParameters,
    StepExecution,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Default)]
pub struct InMemoryStore {
    instances: DashMap<i64, JobInstance>,
    executions: DashMap<i64, JobExecution>,
    steps: DashMap<i64, StepExecution>,
    statistics: DashMap<(String, NaiveDate), Value>,
    instance_seq: AtomicI64,
    execution_seq: AtomicI64,
    step_seq: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(seq: &AtomicI64) -> i64 {
        seq.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
    async fn find_or_create_instance(
        &self,
        job_name: &str,
        identity_key: &str,
    ) -> StoreResult<JobInstance> {
        if let Some(existing) = self.find_instance(job_name, identity_key).await? {
            return Ok(existing);
        }
        let instance = JobInstance {
            instance_id: Self::next(&self.instance_seq),
            job_name: job_name.to_string(),
            identity_key: identity_key.to_string(),
            created_at: Utc::now(),
        };
        self.instances.insert(instance.instance_id, instance.clone());
        Ok(instance)
    }

    async fn find_instance(
        &self,
        job_name: &str,
        identity_key: &str,
    ) -> StoreResult<Option<JobInstance>> {
        Ok(self
            .instances
            .iter()
            .find(|entry| entry.job_name == job_name && entry.identity_key == identity_key)
            .map(|entry| entry.clone()))
    }

    async fn create_execution(
        &self,
        instance: &JobInstance,
        parameters: JobParameters,
        restart_of: Option<i64>,
    ) -> StoreResult<JobExecution> {
        let execution = JobExecution {
            execution_id: Self::next(&self.execution_seq),
            instance_id: instance.instance_id,
            job_name: instance.job_name.clone(),
            status: BatchStatus::Starting,
            exit_status: ExitStatus::completed(),
            parameters,
            context: ExecutionContext::new(),
            restart_of,
            start_time: None,
            end_time: None,
            created_at: Utc::now(),
        };
        self.executions
            .insert(execution.execution_id, execution.clone());
        Ok(execution)
    }

    async fn update_execution(&self, execution: &JobExecution) -> StoreResult<()> {
        let mut entry = self.executions.get_mut(&execution.execution_id).ok_or(
            StoreError::MissingRecord {
                kind: "job execution",
                id: execution.execution_id,
            },
        )?;
        if entry.status.is_terminal() && entry.status != execution.status {
            return Err(StoreError::TerminalStatus {
                id: execution.execution_id,
                status: entry.status.to_string(),
            });
        }
        *entry = execution.clone();
        Ok(())
    }

    async fn execution(&self, execution_id: i64) -> StoreResult<Option<JobExecution>> {
        Ok(self.executions.get(&execution_id).map(|e| e.clone()))
    }

    async fn executions_for_instance(&self, instance_id: i64) -> StoreResult<Vec<JobExecution>> {
        let mut executions: Vec<JobExecution> = self
            .executions
            .iter()
            .filter(|entry| entry.instance_id == instance_id)
            .map(|entry| entry.clone())
            .collect();
        executions.sort_by_key(|e| std::cmp::Reverse(e.execution_id));
        Ok(executions)
    }

    async fn running_executions(&self, job_name: &str) -> StoreResult<Vec<JobExecution>> {
        Ok(self
            .executions
            .iter()
            .filter(|entry| entry.job_name == job_name && entry.status.is_running())
            .map(|entry| entry.clone())
            .collect())
    }

    async fn job_names(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self
            .instances
            .iter()
            .map(|entry| entry.job_name.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn instances(
        &self,
        job_name: &str,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<JobInstance>> {
        let mut instances: Vec<JobInstance> = self
            .instances
            .iter()
            .filter(|entry| entry.job_name == job_name)
            .map(|entry| entry.clone())
            .collect();
        instances.sort_by_key(|i| std::cmp::Reverse(i.instance_id));
        Ok(instances.into_iter().skip(offset).take(limit).collect())
    }

    async fn create_step_execution(
        &self,
        execution_id: i64,
        step_name: &str,
    ) -> StoreResult<StepExecution> {
        if !self.executions.contains_key(&execution_id) {
            return Err(StoreError::MissingRecord {
                kind: "job execution",
                id: execution_id,
            });
        }
        let step = StepExecution::new(Self::next(&self.step_seq), execution_id, step_name);
        self.steps.insert(step.step_execution_id, step.clone());
        Ok(step)
    }

    async fn update_step_execution(&self, step: &StepExecution) -> StoreResult<()> {
        let mut entry =
            self.steps
                .get_mut(&step.step_execution_id)
                .ok_or(StoreError::MissingRecord {
                    kind: "step execution",
                    id: step.step_execution_id,
                })?;
        *entry = step.clone();
        Ok(())
    }

    async fn step_executions(&self, execution_id: i64) -> StoreResult<Vec<StepExecution>> {
        let mut steps: Vec<StepExecution> = self
            .steps
            .iter()
            .filter(|entry| entry.execution_id == execution_id)
            .map(|entry| entry.clone())
            .collect();
        steps.sort_by_key(|s| s.step_execution_id);
        Ok(steps)
    }
}

#[async_trait]
impl StatisticsSink for InMemoryStore {
    async fn upsert(
        &self,
        report_type: &str,
        target_date: NaiveDate,
        payload: Value,
    ) -> StoreResult<()> {
        self.statistics
            .insert((report_type.to_string(), target_date), payload);
        Ok(())
    }

    async fn fetch(&self, report_type: &str, target_date: NaiveDate) -> StoreResult<Option<Value>> {
        Ok(self
            .statistics
            .get(&(report_type.to_string(), target_date))
            .map(|v| v.clone()))
    }
}
