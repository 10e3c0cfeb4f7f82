//! Read-only aggregates over a set of tasks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::task::{Task, TaskStatus, TaskType};

/// Queue and automation statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub total: usize,
    pub by_status: BTreeMap<TaskStatus, usize>,
    pub by_type: BTreeMap<TaskType, usize>,
    /// Tasks whose automated attempt finished (either way).
    pub ai_attempted: usize,
    /// Tasks resolved automatically.
    pub ai_succeeded: usize,
    /// `ai_succeeded / ai_attempted * 100`, 0 without attempts.
    pub ai_success_rate: f64,
    /// Tasks resolved by a human.
    pub human_completed: usize,
    /// Mean seconds from creation to resolution over terminal tasks.
    pub avg_resolution_secs: Option<f64>,
    /// Learnings available per task type.
    pub learning_coverage: BTreeMap<TaskType, usize>,
}

impl TaskStats {
    /// Aggregate `tasks`; `learning_coverage` comes from the learning store.
    pub fn from_tasks<'a, I>(tasks: I, learning_coverage: BTreeMap<TaskType, usize>) -> Self
    where
        I: IntoIterator<Item = &'a Task>,
    {
        let mut stats = TaskStats {
            learning_coverage,
            ..TaskStats::default()
        };
        let mut resolution_total = 0.0;
        let mut resolved = 0usize;

        for task in tasks {
            stats.total += 1;
            *stats.by_status.entry(task.status).or_insert(0) += 1;
            *stats.by_type.entry(task.task_type).or_insert(0) += 1;

            if task
                .ai_attempt
                .as_ref()
                .is_some_and(|a| a.completed_at.is_some())
            {
                stats.ai_attempted += 1;
            }
            match task.status {
                TaskStatus::AiCompleted => stats.ai_succeeded += 1,
                TaskStatus::HumanCompleted => stats.human_completed += 1,
                _ => {}
            }

            if task.status.is_terminal() {
                if let Some(resolved_at) = task.resolved_at() {
                    let elapsed = resolved_at - task.created_at;
                    resolution_total += elapsed.num_milliseconds() as f64 / 1000.0;
                    resolved += 1;
                }
            }
        }

        stats.ai_success_rate = if stats.ai_attempted == 0 {
            0.0
        } else {
            stats.ai_succeeded as f64 / stats.ai_attempted as f64 * 100.0
        };
        stats.avg_resolution_secs = (resolved > 0).then(|| resolution_total / resolved as f64);
        stats
    }
}
