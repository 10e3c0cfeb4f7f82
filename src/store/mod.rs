//! Task and learning persistence.
//!
//! Two collections, `tasks` and `learnings`, each keyed by opaque id. The
//! stores are the only shared mutable state in the system, so they carry the
//! concurrency guarantees the engine relies on:
//!
//! - [`TaskStore::update`] is a conditional write keyed on the task's
//!   `version`; a stale writer gets [`FlywheelError::Conflict`] and nothing
//!   is written.
//! - Learning counters are changed with single-call atomic operations, never
//!   read-modify-write from the caller.
//!
//! [`FlywheelError::Conflict`]: crate::error::FlywheelError::Conflict

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::learning::{Learning, LearningId, LearningQuery, NewLearning};
use crate::task::{Priority, Task, TaskId, TaskStatus, TaskType, TaskUpdate};

/// Equality filters for task queries. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    #[serde(rename = "type")]
    pub task_type: Option<TaskType>,
    pub project_id: Option<String>,
    pub priority: Option<Priority>,
    pub assigned_to: Option<String>,
    /// Only tasks created at or after this instant.
    pub created_since: Option<DateTime<Utc>>,
}

impl TaskFilter {
    /// Whether `task` satisfies every set filter.
    #[must_use]
    pub fn matches(&self, task: &Task) -> bool {
        self.status.is_none_or(|s| task.status == s)
            && self.task_type.is_none_or(|t| task.task_type == t)
            && self
                .project_id
                .as_deref()
                .is_none_or(|p| task.project_id == p)
            && self.priority.is_none_or(|p| task.priority == p)
            && self
                .assigned_to
                .as_deref()
                .is_none_or(|a| task.assigned_to() == Some(a))
            && self.created_since.is_none_or(|since| task.created_at >= since)
    }
}

/// Result ordering for task queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOrder {
    /// Most urgent first, then oldest first (work-queue order).
    #[default]
    Priority,
    /// Newest first.
    CreatedDesc,
    /// Least recently written first.
    UpdatedAsc,
}

impl TaskOrder {
    #[must_use]
    pub fn compare(&self, a: &Task, b: &Task) -> std::cmp::Ordering {
        match self {
            TaskOrder::Priority => a
                .priority
                .cmp(&b.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id)),
            TaskOrder::CreatedDesc => b
                .created_at
                .cmp(&a.created_at)
                .then_with(|| a.id.cmp(&b.id)),
            TaskOrder::UpdatedAsc => a
                .updated_at
                .cmp(&b.updated_at)
                .then_with(|| a.id.cmp(&b.id)),
        }
    }
}

/// Persistence for tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task and return its id.
    ///
    /// # Errors
    ///
    /// Returns an infrastructure error if the write fails.
    async fn create(&self, task: Task) -> Result<TaskId>;

    /// Fetch a task.
    ///
    /// # Errors
    ///
    /// Returns [`FlywheelError::TaskNotFound`](crate::error::FlywheelError::TaskNotFound)
    /// if no task has this id.
    async fn get(&self, id: &TaskId) -> Result<Task>;

    /// Apply `update` if the stored version equals `expected_version`.
    ///
    /// Stamps `updatedAt`, bumps `version` and returns the task as written.
    ///
    /// # Errors
    ///
    /// - `TaskNotFound` if the task does not exist
    /// - `Conflict` if another write landed first
    /// - `InvalidState` / `LearningDataAlreadySet` if the update is illegal
    async fn update(&self, id: &TaskId, expected_version: u64, update: TaskUpdate) -> Result<Task>;

    /// Query tasks by equality filters.
    async fn query(&self, filter: &TaskFilter, order: TaskOrder, limit: usize) -> Result<Vec<Task>>;
}

/// Persistence for learnings.
#[async_trait]
pub trait LearningStore: Send + Sync {
    /// Insert a new learning with zeroed counters and return its id.
    async fn create(&self, learning: NewLearning) -> Result<LearningId>;

    /// Fetch a learning.
    async fn get(&self, id: &LearningId) -> Result<Learning>;

    /// Run a learning lookup (type filter, one context filter, ordering, cap).
    async fn query(&self, query: &LearningQuery) -> Result<Vec<Learning>>;

    /// Atomically increment `usageCount` and stamp `lastUsedAt`.
    async fn increment_usage(&self, id: &LearningId, at: DateTime<Utc>) -> Result<()>;

    /// Atomically increment `successCount`.
    async fn record_success(&self, id: &LearningId) -> Result<()>;

    /// Atomically increment `failureCount` and decay confidence by `step`.
    async fn record_failure(&self, id: &LearningId, step: f64, clamp: bool) -> Result<()>;

    /// Number of learnings per task type.
    async fn count_by_type(&self) -> Result<BTreeMap<TaskType, usize>>;
}
