//! # Recovery Service
//!
//! Operator-facing repair operations over finished (or stuck) executions:
//! restart a failed run, analyze its skips or its failure, and request a
//! cooperative stop of a long-running one. Every operation validates against
//! the store first and returns a typed error on misuse; none of them mutate
//! a terminal record.

use crate::engine::JobEngine;
use crate::error::{BatchError, Result};
use crate::model::{BatchStatus, JobExecution, ParameterValue, StepExecution};
use crate::store::StatisticsSink;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Report type under which recovery actions are recorded in the statistics
/// sink.
const RECOVERY_REPORT_TYPE: &str = "recovery_actions";

const RESTART_TIMESTAMP_PARAM: &str = "restartTimestamp";
const RESTART_REASON_PARAM: &str = "restartReason";
const ORIGINAL_EXECUTION_PARAM: &str = "originalExecutionId";
const RESTART_REASON: &str = "ERROR_RECOVERY";

/// Keywords in failure messages that suggest the problem is the
/// infrastructure rather than the data.
const CONNECTIVITY_KEYWORDS: &[&str] = &["connection", "database", "timeout", "refused"];

pub struct RecoveryService {
    engine: Arc<JobEngine>,
    statistics: Option<Arc<dyn StatisticsSink>>,
}

/// Skip counts aggregated across one execution's steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkipReport {
    pub execution_id: i64,
    pub job_name: String,
    pub total_skips: u64,
    pub steps: Vec<StepSkips>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSkips {
    pub step_name: String,
    pub skip_count: u64,
    pub failure_messages: Vec<String>,
}

impl SkipReport {
    /// False means there is nothing to analyze; the report is benign.
    pub fn has_skips(&self) -> bool {
        self.total_skips > 0
    }
}

/// Best-effort next actions derived from a failed execution's records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    /// Relaunch through [`RecoveryService::restart`]
    Restart,
    /// Skipped items carry data problems worth inspecting
    AnalyzeSkips,
    /// Failure messages point at connectivity, check the infrastructure
    /// before restarting
    CheckInfrastructure,
}

/// Per-step breakdown plus recommendations for one failed execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureReport {
    pub execution_id: i64,
    pub job_name: String,
    pub status: BatchStatus,
    pub exit_description: String,
    pub steps: Vec<StepFailureDetail>,
    pub recommendations: Vec<Recommendation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepFailureDetail {
    pub step_name: String,
    pub status: BatchStatus,
    pub read_count: u64,
    pub write_count: u64,
    pub skip_count: u64,
    pub failure_messages: Vec<String>,
}

impl RecoveryService {
    pub fn new(engine: Arc<JobEngine>) -> Self {
        Self {
            engine,
            statistics: None,
        }
    }

    /// Record recovery actions to a statistics sink for later audit.
    pub fn with_statistics(mut self, statistics: Arc<dyn StatisticsSink>) -> Self {
        self.statistics = Some(statistics);
        self
    }

    /// Append one action entry to today's recovery audit payload. Best
    /// effort: a sink failure is logged, never surfaced to the caller whose
    /// recovery action already succeeded.
    async fn record_action(&self, action: &str, execution_id: i64, detail: serde_json::Value) {
        let Some(sink) = &self.statistics else {
            return;
        };
        let today = chrono::Utc::now().date_naive();
        let entry = serde_json::json!({
            "action": action,
            "executionId": execution_id,
            "detail": detail,
            "at": chrono::Utc::now().to_rfc3339(),
        });
        let result = async {
            let mut entries = match sink.fetch(RECOVERY_REPORT_TYPE, today).await? {
                Some(serde_json::Value::Array(entries)) => entries,
                _ => Vec::new(),
            };
            entries.push(entry);
            sink.upsert(RECOVERY_REPORT_TYPE, today, serde_json::Value::Array(entries))
                .await
        }
        .await;
        if let Err(error) = result {
            warn!(action, execution_id, %error, "Could not record recovery action");
        }
    }

    /// Relaunch a FAILED execution as a fresh execution carrying a
    /// back-reference to the original. The restart parameters are the
    /// original's plus a fresh restart timestamp, so the relaunch never
    /// collides with an already-completed parameter combination and never
    /// overwrites the original's record.
    pub async fn restart(&self, execution_id: i64) -> Result<i64> {
        let original = self.engine.execution(execution_id).await?;
        if !original.status.is_restartable() {
            return Err(BatchError::InvalidState {
                operation: "restart",
                expected: "FAILED",
                found: original.status.to_string(),
            });
        }

        let parameters = original
            .parameters
            .clone()
            .with_long(RESTART_TIMESTAMP_PARAM, chrono::Utc::now().timestamp_millis())
            .with_non_identifying(
                RESTART_REASON_PARAM,
                ParameterValue::String(RESTART_REASON.to_string()),
            )
            .with_non_identifying(
                ORIGINAL_EXECUTION_PARAM,
                ParameterValue::Long(execution_id),
            );

        let new_id = self
            .engine
            .launch_restart(&original.job_name, parameters, execution_id)
            .await?;
        info!(
            job_name = %original.job_name,
            original_execution_id = execution_id,
            new_execution_id = new_id,
            "Restarted failed execution"
        );
        self.record_action(
            "restart",
            execution_id,
            serde_json::json!({ "newExecutionId": new_id, "jobName": original.job_name }),
        )
        .await;
        Ok(new_id)
    }

    /// Retry one failed step of a failed execution.
    ///
    /// Current policy degrades to a full-job restart after validating that
    /// the named step exists and actually failed; step-level resumption that
    /// skips completed upstream steps is not implemented.
    pub async fn retry_step(&self, execution_id: i64, step_name: &str) -> Result<i64> {
        let execution = self.engine.execution(execution_id).await?;
        if !execution.status.is_restartable() {
            return Err(BatchError::InvalidState {
                operation: "retry_step",
                expected: "FAILED",
                found: execution.status.to_string(),
            });
        }
        let steps = self.engine.step_executions(execution_id).await?;
        let step = steps
            .iter()
            .find(|s| s.step_name == step_name)
            .ok_or_else(|| BatchError::InvalidState {
                operation: "retry_step",
                expected: "an existing step",
                found: format!("no step named '{step_name}'"),
            })?;
        if step.status != BatchStatus::Failed {
            return Err(BatchError::InvalidState {
                operation: "retry_step",
                expected: "FAILED",
                found: step.status.to_string(),
            });
        }

        warn!(
            execution_id,
            step_name, "Step-level retry degrades to a full job restart"
        );
        self.restart(execution_id).await
    }

    /// Aggregate skip counts across the execution's steps. Read-only; a
    /// zero-skip execution yields a benign empty report.
    pub async fn analyze_skips(&self, execution_id: i64) -> Result<SkipReport> {
        let execution = self.engine.execution(execution_id).await?;
        let steps = self.engine.step_executions(execution_id).await?;

        let step_skips: Vec<StepSkips> = steps
            .iter()
            .filter(|step| step.skip_count > 0)
            .map(|step| StepSkips {
                step_name: step.step_name.clone(),
                skip_count: step.skip_count,
                failure_messages: step.failure_messages.clone(),
            })
            .collect();
        Ok(SkipReport {
            execution_id,
            job_name: execution.job_name,
            total_skips: step_skips.iter().map(|s| s.skip_count).sum(),
            steps: step_skips,
        })
    }

    /// Request a cooperative stop. Refused unless the execution is STARTED
    /// and has been running at least the configured minimum; on success the
    /// execution transitions to STOPPING and the engine exits at the next
    /// chunk or node boundary. Advisory only, never forced termination.
    pub async fn stop(&self, execution_id: i64) -> Result<()> {
        let mut execution = self.engine.execution(execution_id).await?;
        if execution.status != BatchStatus::Started {
            return Err(BatchError::StopRefused {
                execution_id,
                reason: format!("execution is {}, not STARTED", execution.status),
            });
        }
        let min_runtime = chrono::Duration::seconds(
            self.engine.config().stop_min_runtime_secs as i64,
        );
        let running_time = execution
            .running_time()
            .unwrap_or_else(chrono::Duration::zero);
        if running_time < min_runtime {
            return Err(BatchError::StopRefused {
                execution_id,
                reason: format!(
                    "running {}s, minimum before stop is {}s",
                    running_time.num_seconds(),
                    min_runtime.num_seconds()
                ),
            });
        }

        execution.status = BatchStatus::Stopping;
        self.engine.store().update_execution(&execution).await?;
        if !self.engine.signal_stop(execution_id) {
            warn!(
                execution_id,
                "Execution marked STOPPING but no drive task found in this process"
            );
        }
        info!(execution_id, "Stop requested");
        self.record_action(
            "stop",
            execution_id,
            serde_json::json!({ "jobName": execution.job_name }),
        )
        .await;
        Ok(())
    }

    /// Per-step failure breakdown plus heuristic recommendations.
    pub async fn analyze_failure(&self, execution_id: i64) -> Result<FailureReport> {
        let execution = self.engine.execution(execution_id).await?;
        let steps = self.engine.step_executions(execution_id).await?;
        let recommendations = recommend(&execution, &steps);

        Ok(FailureReport {
            execution_id,
            job_name: execution.job_name,
            status: execution.status,
            exit_description: execution.exit_status.description,
            steps: steps
                .into_iter()
                .map(|step| StepFailureDetail {
                    step_name: step.step_name,
                    status: step.status,
                    read_count: step.read_count,
                    write_count: step.write_count,
                    skip_count: step.skip_count,
                    failure_messages: step.failure_messages,
                })
                .collect(),
            recommendations,
        })
    }
}

fn recommend(execution: &JobExecution, steps: &[StepExecution]) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();
    if execution.status == BatchStatus::Failed {
        recommendations.push(Recommendation::Restart);
    }
    if steps.iter().any(|s| s.skip_count > 0) {
        recommendations.push(Recommendation::AnalyzeSkips);
    }
    let connectivity_suspected = steps
        .iter()
        .flat_map(|s| s.failure_messages.iter())
        .chain(std::iter::once(&execution.exit_status.description))
        .any(|message| {
            let lowered = message.to_lowercase();
            CONNECTIVITY_KEYWORDS.iter().any(|kw| lowered.contains(kw))
        });
    if connectivity_suspected {
        recommendations.push(Recommendation::CheckInfrastructure);
    }
    recommendations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionContext, ExitStatus, JobParameters};

    fn failed_execution(description: &str) -> JobExecution {
        JobExecution {
            execution_id: 1,
            instance_id: 1,
            job_name: "bookProcessingJob".to_string(),
            status: BatchStatus::Failed,
            exit_status: ExitStatus::failed().with_description(description),
            parameters: JobParameters::new(),
            context: ExecutionContext::new(),
            restart_of: None,
            start_time: None,
            end_time: None,
            created_at: chrono::Utc::now(),
        }
    }

    fn step_with(skips: u64, messages: &[&str]) -> StepExecution {
        let mut step = StepExecution::new(1, 1, "processStep");
        step.status = BatchStatus::Failed;
        step.skip_count = skips;
        step.failure_messages = messages.iter().map(|m| m.to_string()).collect();
        step
    }

    #[test]
    fn test_failed_execution_always_gets_restart() {
        let recommendations = recommend(&failed_execution("boom"), &[]);
        assert_eq!(recommendations, vec![Recommendation::Restart]);
    }

    #[test]
    fn test_skips_recommend_skip_analysis() {
        let recommendations = recommend(&failed_execution("boom"), &[step_with(3, &[])]);
        assert!(recommendations.contains(&Recommendation::AnalyzeSkips));
    }

    #[test]
    fn test_connectivity_keywords_recommend_infrastructure_check() {
        for message in [
            "Connection reset by peer",
            "database is unavailable",
            "read timeout after 30s",
            "connect refused",
        ] {
            let recommendations = recommend(&failed_execution("boom"), &[step_with(0, &[message])]);
            assert!(
                recommendations.contains(&Recommendation::CheckInfrastructure),
                "expected infrastructure check for: {message}"
            );
        }

        let recommendations = recommend(&failed_execution("bad isbn"), &[step_with(0, &[])]);
        assert!(!recommendations.contains(&Recommendation::CheckInfrastructure));
    }
}
