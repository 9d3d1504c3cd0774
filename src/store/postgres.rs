//! Postgres-backed execution store and statistics sink.
//!
//! Uses runtime-checked sqlx queries over the schema in `migrations/`, so the
//! crate compiles without a live database. Counter columns are BIGINT; the
//! (report_type, target_date) primary key on `batch_statistics` is what makes
//! partition-result writes an upsert rather than an insert.

use super::{ExecutionStore, StatisticsSink, StoreError, StoreResult};
use crate::model::{
    BatchStatus, ExitStatus, JobExecution, JobInstance, JobParameters, StepExecution,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn instance_from_row(row: &PgRow) -> StoreResult<JobInstance> {
        Ok(JobInstance {
            instance_id: row.try_get("id")?,
            job_name: row.try_get("job_name")?,
            identity_key: row.try_get("identity_key")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn execution_from_row(row: &PgRow) -> StoreResult<JobExecution> {
        let status: String = row.try_get("status")?;
        let parameters: Value = row.try_get("parameters")?;
        let context: Value = row.try_get("context")?;
        Ok(JobExecution {
            execution_id: row.try_get("id")?,
            instance_id: row.try_get("instance_id")?,
            job_name: row.try_get("job_name")?,
            status: status
                .parse::<BatchStatus>()
                .map_err(StoreError::Database)?,
            exit_status: ExitStatus::new(row.try_get::<String, _>("exit_code")?)
                .with_description(row.try_get::<String, _>("exit_description")?),
            parameters: serde_json::from_value::<JobParameters>(parameters)?,
            context: serde_json::from_value(context)?,
            restart_of: row.try_get("restart_of")?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn step_from_row(row: &PgRow) -> StoreResult<StepExecution> {
        let status: String = row.try_get("status")?;
        let context: Value = row.try_get("context")?;
        let failure_messages: Value = row.try_get("failure_messages")?;
        Ok(StepExecution {
            step_execution_id: row.try_get("id")?,
            execution_id: row.try_get("execution_id")?,
            step_name: row.try_get("step_name")?,
            status: status
                .parse::<BatchStatus>()
                .map_err(StoreError::Database)?,
            exit_status: ExitStatus::new(row.try_get::<String, _>("exit_code")?)
                .with_description(row.try_get::<String, _>("exit_description")?),
            read_count: row.try_get::<i64, _>("read_count")? as u64,
            write_count: row.try_get::<i64, _>("write_count")? as u64,
            filter_count: row.try_get::<i64, _>("filter_count")? as u64,
            skip_count: row.try_get::<i64, _>("skip_count")? as u64,
            rollback_count: row.try_get::<i64, _>("rollback_count")? as u64,
            commit_count: row.try_get::<i64, _>("commit_count")? as u64,
            context: serde_json::from_value(context)?,
            failure_messages: serde_json::from_value(failure_messages)?,
            start_time: row.try_get("start_time")?,
            end_time: row.try_get("end_time")?,
        })
    }
}

#[async_trait]
impl ExecutionStore for PgStore {
    async fn find_or_create_instance(
        &self,
        job_name: &str,
        identity_key: &str,
    ) -> StoreResult<JobInstance> {
        let row = sqlx::query(
            "INSERT INTO batch_job_instances (job_name, identity_key)
             VALUES ($1, $2)
             ON CONFLICT (job_name, identity_key) DO UPDATE SET job_name = EXCLUDED.job_name
             RETURNING id, job_name, identity_key, created_at",
        )
        .bind(job_name)
        .bind(identity_key)
        .fetch_one(&self.pool)
        .await?;
        Self::instance_from_row(&row)
    }

    async fn find_instance(
        &self,
        job_name: &str,
        identity_key: &str,
    ) -> StoreResult<Option<JobInstance>> {
        let row = sqlx::query(
            "SELECT id, job_name, identity_key, created_at
             FROM batch_job_instances
             WHERE job_name = $1 AND identity_key = $2",
        )
        .bind(job_name)
        .bind(identity_key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::instance_from_row).transpose()
    }

    async fn create_execution(
        &self,
        instance: &JobInstance,
        parameters: JobParameters,
        restart_of: Option<i64>,
    ) -> StoreResult<JobExecution> {
        let row = sqlx::query(
            "INSERT INTO batch_job_executions
                 (instance_id, job_name, status, exit_code, exit_description,
                  parameters, context, restart_of)
             VALUES ($1, $2, $3, $4, '', $5, $6, $7)
             RETURNING id, instance_id, job_name, status, exit_code, exit_description,
                       parameters, context, restart_of, start_time, end_time, created_at",
        )
        .bind(instance.instance_id)
        .bind(&instance.job_name)
        .bind(BatchStatus::Starting.to_string())
        .bind(ExitStatus::COMPLETED)
        .bind(serde_json::to_value(&parameters)?)
        .bind(serde_json::to_value(crate::model::ExecutionContext::new())?)
        .bind(restart_of)
        .fetch_one(&self.pool)
        .await?;
        Self::execution_from_row(&row)
    }

    async fn update_execution(&self, execution: &JobExecution) -> StoreResult<()> {
        // Terminal-status immutability enforced in SQL: the update only
        // matches rows whose current status is non-terminal or unchanged.
        let result = sqlx::query(
            "UPDATE batch_job_executions
             SET status = $2, exit_code = $3, exit_description = $4, context = $5,
                 start_time = $6, end_time = $7
             WHERE id = $1
               AND (status NOT IN ('COMPLETED', 'FAILED', 'STOPPED') OR status = $2)",
        )
        .bind(execution.execution_id)
        .bind(execution.status.to_string())
        .bind(&execution.exit_status.code)
        .bind(&execution.exit_status.description)
        .bind(serde_json::to_value(&execution.context)?)
        .bind(execution.start_time)
        .bind(execution.end_time)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            match self.execution(execution.execution_id).await? {
                Some(current) => Err(StoreError::TerminalStatus {
                    id: execution.execution_id,
                    status: current.status.to_string(),
                }),
                None => Err(StoreError::MissingRecord {
                    kind: "job execution",
                    id: execution.execution_id,
                }),
            }
        } else {
            Ok(())
        }
    }

    async fn execution(&self, execution_id: i64) -> StoreResult<Option<JobExecution>> {
        let row = sqlx::query(
            "SELECT id, instance_id, job_name, status, exit_code, exit_description,
                    parameters, context, restart_of, start_time, end_time, created_at
             FROM batch_job_executions WHERE id = $1",
        )
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::execution_from_row).transpose()
    }

    async fn executions_for_instance(&self, instance_id: i64) -> StoreResult<Vec<JobExecution>> {
        let rows = sqlx::query(
            "SELECT id, instance_id, job_name, status, exit_code, exit_description,
                    parameters, context, restart_of, start_time, end_time, created_at
             FROM batch_job_executions WHERE instance_id = $1 ORDER BY id DESC",
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::execution_from_row).collect()
    }

    async fn running_executions(&self, job_name: &str) -> StoreResult<Vec<JobExecution>> {
        let rows = sqlx::query(
            "SELECT id, instance_id, job_name, status, exit_code, exit_description,
                    parameters, context, restart_of, start_time, end_time, created_at
             FROM batch_job_executions
             WHERE job_name = $1 AND status IN ('STARTING', 'STARTED', 'STOPPING')
             ORDER BY id DESC",
        )
        .bind(job_name)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::execution_from_row).collect()
    }

    async fn job_names(&self) -> StoreResult<Vec<String>> {
        let rows =
            sqlx::query("SELECT DISTINCT job_name FROM batch_job_instances ORDER BY job_name")
                .fetch_all(&self.pool)
                .await?;
        rows.iter()
            .map(|row| row.try_get("job_name").map_err(StoreError::from))
            .collect()
    }

    async fn instances(
        &self,
        job_name: &str,
        offset: usize,
        limit: usize,
    ) -> StoreResult<Vec<JobInstance>> {
        let rows = sqlx::query(
            "SELECT id, job_name, identity_key, created_at
             FROM batch_job_instances
             WHERE job_name = $1 ORDER BY id DESC OFFSET $2 LIMIT $3",
        )
        .bind(job_name)
        .bind(offset as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::instance_from_row).collect()
    }

    async fn create_step_execution(
        &self,
        execution_id: i64,
        step_name: &str,
    ) -> StoreResult<StepExecution> {
        let row = sqlx::query(
            "INSERT INTO batch_step_executions (execution_id, step_name, status, exit_code, exit_description)
             VALUES ($1, $2, $3, $4, '')
             RETURNING id, execution_id, step_name, status, exit_code, exit_description,
                       read_count, write_count, filter_count, skip_count, rollback_count,
                       commit_count, context, failure_messages, start_time, end_time",
        )
        .bind(execution_id)
        .bind(step_name)
        .bind(BatchStatus::Starting.to_string())
        .bind(ExitStatus::COMPLETED)
        .fetch_one(&self.pool)
        .await?;
        Self::step_from_row(&row)
    }

    async fn update_step_execution(&self, step: &StepExecution) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE batch_step_executions
             SET status = $2, exit_code = $3, exit_description = $4,
                 read_count = $5, write_count = $6, filter_count = $7, skip_count = $8,
                 rollback_count = $9, commit_count = $10, context = $11,
                 failure_messages = $12, start_time = $13, end_time = $14
             WHERE id = $1",
        )
        .bind(step.step_execution_id)
        .bind(step.status.to_string())
        .bind(&step.exit_status.code)
        .bind(&step.exit_status.description)
        .bind(step.read_count as i64)
        .bind(step.write_count as i64)
        .bind(step.filter_count as i64)
        .bind(step.skip_count as i64)
        .bind(step.rollback_count as i64)
        .bind(step.commit_count as i64)
        .bind(serde_json::to_value(&step.context)?)
        .bind(serde_json::to_value(&step.failure_messages)?)
        .bind(step.start_time)
        .bind(step.end_time)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::MissingRecord {
                kind: "step execution",
                id: step.step_execution_id,
            });
        }
        Ok(())
    }

    async fn step_executions(&self, execution_id: i64) -> StoreResult<Vec<StepExecution>> {
        let rows = sqlx::query(
            "SELECT id, execution_id, step_name, status, exit_code, exit_description,
                    read_count, write_count, filter_count, skip_count, rollback_count,
                    commit_count, context, failure_messages, start_time, end_time
             FROM batch_step_executions WHERE execution_id = $1 ORDER BY id",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::step_from_row).collect()
    }
}

#[async_trait]
impl StatisticsSink for PgStore {
    async fn upsert(
        &self,
        report_type: &str,
        target_date: NaiveDate,
        payload: Value,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO batch_statistics (report_type, target_date, data_json)
             VALUES ($1, $2, $3)
             ON CONFLICT (report_type, target_date)
             DO UPDATE SET data_json = EXCLUDED.data_json, updated_at = NOW()",
        )
        .bind(report_type)
        .bind(target_date)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch(&self, report_type: &str, target_date: NaiveDate) -> StoreResult<Option<Value>> {
        let row = sqlx::query(
            "SELECT data_json FROM batch_statistics WHERE report_type = $1 AND target_date = $2",
        )
        .bind(report_type)
        .bind(target_date)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.try_get("data_json").map_err(StoreError::from))
            .transpose()
    }
}
