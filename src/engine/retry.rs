//! Manual retry and recovery of stranded tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{Engine, ProcessOutcome};
use crate::error::{FlywheelError, Result};
use crate::learning::LearningSynthesizer;
use crate::store::{TaskFilter, TaskOrder, TaskStore};
use crate::task::{
    AiAttemptOutcome, AiAttemptUpdate, HumanFallbackUpdate, LearningData, Task, TaskId,
    TaskStatus, TaskUpdate,
};

/// Error recorded on an automated attempt abandoned by the sweep.
pub const SWEEP_TIMEOUT_ERROR: &str = "timed out";

/// One task moved by [`Engine::sweep_stale`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweptTask {
    pub id: TaskId,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Summary of a sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub recovered: Vec<SweptTask>,
    /// Stale tasks that changed underneath the sweep and were left alone.
    pub skipped: usize,
}

impl Engine {
    /// Re-run automation for a failed or escalated task.
    ///
    /// # Errors
    ///
    /// - `InvalidState` unless the task is `ai_failed` or `human_needed`
    /// - `RetryLimit` once `retry_count` has reached `max_retries`
    /// - `Conflict` if another caller changed the task first
    pub async fn retry_ai_task(&self, id: &TaskId) -> Result<ProcessOutcome> {
        let task = self.tasks.get(id).await?;
        task.ensure_status("retry", &TaskStatus::RETRYABLE)?;
        if !task.has_retries_left() {
            return Err(FlywheelError::RetryLimit {
                id: id.clone(),
                retry_count: task.retry_count,
                max_retries: task.max_retries,
            });
        }

        info!(
            task_id = %id,
            from = %task.status,
            retry_count = task.retry_count,
            "Retrying AI processing"
        );

        self.tasks
            .update(id, task.version, TaskUpdate::status(TaskStatus::Pending))
            .await?;
        self.process_task(id).await
    }

    /// Recover tasks stranded in an in-flight status.
    ///
    /// - `ai_processing` older than `stale_after` is closed as a failed
    ///   attempt (counts against the retry budget)
    /// - `learning` older than `stale_after` completes with no learning id
    /// - `human_processing` older than `human_stale_after` is released back
    ///   to `human_needed`
    ///
    /// Tasks written concurrently with the sweep are skipped.
    pub async fn sweep_stale(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let windows = [
            (TaskStatus::AiProcessing, self.config.stale_after()),
            (TaskStatus::Learning, self.config.stale_after()),
            (TaskStatus::HumanProcessing, self.config.human_stale_after()),
        ];

        for (status, window) in windows {
            let Some(cutoff) = now.checked_sub_signed(window) else {
                continue;
            };
            let filter = TaskFilter {
                status: Some(status),
                ..TaskFilter::default()
            };
            let candidates = self
                .tasks
                .query(&filter, TaskOrder::UpdatedAsc, usize::MAX)
                .await?;

            for task in candidates.into_iter().filter(|t| t.updated_at < cutoff) {
                let update = recovery_update(&task, now);
                match self.tasks.update(&task.id, task.version, update).await {
                    Ok(written) => {
                        warn!(
                            task_id = %task.id,
                            from = %status,
                            to = %written.status,
                            idle_secs = (now - task.updated_at).num_seconds(),
                            "Recovered stranded task"
                        );
                        report.recovered.push(SweptTask {
                            id: task.id,
                            from: status,
                            to: written.status,
                        });
                    }
                    Err(FlywheelError::Conflict { .. }) => {
                        debug!(task_id = %task.id, "Task changed during sweep, skipping");
                        report.skipped += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        info!(
            recovered = report.recovered.len(),
            skipped = report.skipped,
            "Sweep finished"
        );
        Ok(report)
    }
}

fn recovery_update(task: &Task, now: DateTime<Utc>) -> TaskUpdate {
    match task.status {
        TaskStatus::AiProcessing => {
            let retry_count = task.retry_count + 1;
            let status = if retry_count >= task.max_retries {
                TaskStatus::HumanNeeded
            } else {
                TaskStatus::AiFailed
            };
            TaskUpdate::status(status)
                .with_retry_count(retry_count)
                .with_ai_attempt(AiAttemptUpdate::Finish(AiAttemptOutcome {
                    completed_at: now,
                    result: None,
                    confidence: 0.0,
                    error: Some(SWEEP_TIMEOUT_ERROR.to_string()),
                    learnings_applied: Vec::new(),
                }))
        }
        TaskStatus::Learning => {
            TaskUpdate::status(TaskStatus::HumanCompleted).with_learning_data(LearningData {
                learning_id: None,
                ai_input: task.input.clone(),
                human_output: task.output.clone(),
                delta: LearningSynthesizer::delta(task),
                trainable: true,
            })
        }
        _ => TaskUpdate::status(TaskStatus::HumanNeeded)
            .with_human_fallback(HumanFallbackUpdate::Release),
    }
}
