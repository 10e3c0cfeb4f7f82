//! Request and response bodies for the remote operations.
//!
//! Field names are camelCase on the wire. Requests carry task types and
//! statuses as plain strings so that an unknown value is reported as a
//! validation error rather than a deserialization failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::{
    CompletionOutcome, HumanCompletion, NewTask, ProcessOutcome, SweepReport, SweptTask, TaskStats,
};
use crate::error::{ErrorCategory, FlywheelError, Result};
use crate::learning::{Learning, LearningId};
use crate::store::TaskFilter;
use crate::task::{Priority, Task, TaskId, TaskStatus, TaskType};

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[serde(rename = "type")]
    pub task_type: String,
    pub project_id: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub auto_process: bool,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl CreateTaskRequest {
    /// Validate and convert into engine parameters.
    pub fn into_new_task(self) -> Result<NewTask> {
        let task_type: TaskType = self.task_type.parse()?;
        let mut new = NewTask::new(task_type, self.project_id, self.input)
            .auto_process(self.auto_process);
        if let Some(priority) = self.priority {
            new = new.with_priority(Priority::new(priority)?);
        }
        if let Some(max_retries) = self.max_retries {
            new = new.with_max_retries(max_retries);
        }
        Ok(new)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscalateRequest {
    pub task_id: TaskId,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub task_id: TaskId,
    pub action: String,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CompleteRequest {
    #[must_use]
    pub fn into_completion(self) -> (TaskId, HumanCompletion) {
        (
            self.task_id,
            HumanCompletion {
                action: self.action,
                output: self.output,
                notes: self.notes,
            },
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRequest {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, rename = "type")]
    pub task_type: Option<String>,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl QueueRequest {
    /// Validate the filter fields.
    pub fn to_filter(&self) -> Result<TaskFilter> {
        Ok(TaskFilter {
            status: self
                .status
                .as_deref()
                .map(str::parse::<TaskStatus>)
                .transpose()?,
            task_type: self
                .task_type
                .as_deref()
                .map(str::parse::<TaskType>)
                .transpose()?,
            project_id: self.project_id.clone(),
            priority: self.priority.map(Priority::new).transpose()?,
            assigned_to: self.assigned_to.clone(),
            created_since: None,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsRequest {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusResponse {
    pub success: bool,
    pub task_id: TaskId,
    pub status: TaskStatus,
}

impl From<&Task> for TaskStatusResponse {
    fn from(task: &Task) -> Self {
        Self {
            success: true,
            task_id: task.id.clone(),
            status: task.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    pub success: bool,
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub confidence: f64,
}

impl From<&ProcessOutcome> for ProcessResponse {
    fn from(outcome: &ProcessOutcome) -> Self {
        Self {
            success: true,
            task_id: outcome.task.id.clone(),
            status: outcome.task.status,
            confidence: outcome.confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    pub success: bool,
    pub task_id: TaskId,
    pub learning_id: Option<LearningId>,
}

impl From<&CompletionOutcome> for CompleteResponse {
    fn from(outcome: &CompletionOutcome) -> Self {
        Self {
            success: true,
            task_id: outcome.task.id.clone(),
            learning_id: outcome.learning_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub success: bool,
    pub task: Task,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueResponse {
    pub success: bool,
    pub tasks: Vec<Task>,
    pub count: usize,
}

impl From<Vec<Task>> for QueueResponse {
    fn from(tasks: Vec<Task>) -> Self {
        Self {
            success: true,
            count: tasks.len(),
            tasks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsResponse {
    pub success: bool,
    pub stats: TaskStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningsResponse {
    pub success: bool,
    pub learnings: Vec<Learning>,
    pub count: usize,
}

impl From<Vec<Learning>> for LearningsResponse {
    fn from(learnings: Vec<Learning>) -> Self {
        Self {
            success: true,
            count: learnings.len(),
            learnings,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepResponse {
    pub success: bool,
    pub recovered: Vec<SweptTask>,
    pub skipped: usize,
}

impl From<SweepReport> for SweepResponse {
    fn from(report: SweepReport) -> Self {
        Self {
            success: true,
            recovered: report.recovered,
            skipped: report.skipped,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Structured rejection body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&FlywheelError> for ErrorBody {
    fn from(err: &FlywheelError) -> Self {
        Self {
            success: false,
            category: err.category(),
            code: err.code().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}
