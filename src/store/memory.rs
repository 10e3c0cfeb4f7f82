//! Process-local store for both collections.
//!
//! All state sits behind one `tokio::sync::RwLock`, so a conditional task
//! write (version check + apply) and a learning counter update each happen
//! under a single write guard and cannot interleave with other writers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{LearningStore, TaskFilter, TaskOrder, TaskStore};
use crate::error::{FlywheelError, Result};
use crate::learning::{select_learnings, Learning, LearningId, LearningQuery, NewLearning};
use crate::task::{Task, TaskId, TaskType, TaskUpdate};

#[derive(Debug, Default)]
struct Collections {
    tasks: HashMap<TaskId, Task>,
    learnings: HashMap<LearningId, Learning>,
}

/// In-memory implementation of [`TaskStore`] and [`LearningStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Collections>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with existing records.
    #[must_use]
    pub fn from_records(tasks: Vec<Task>, learnings: Vec<Learning>) -> Self {
        let collections = Collections {
            tasks: tasks.into_iter().map(|t| (t.id.clone(), t)).collect(),
            learnings: learnings.into_iter().map(|l| (l.id.clone(), l)).collect(),
        };
        Self {
            inner: RwLock::new(collections),
        }
    }

    /// Snapshot of every task, ordered by creation time.
    pub async fn all_tasks(&self) -> Vec<Task> {
        let guard = self.inner.read().await;
        let mut tasks: Vec<Task> = guard.tasks.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    /// Snapshot of every learning, ordered by creation time.
    pub async fn all_learnings(&self) -> Vec<Learning> {
        let guard = self.inner.read().await;
        let mut learnings: Vec<Learning> = guard.learnings.values().cloned().collect();
        learnings.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        learnings
    }

    async fn with_learning<F>(&self, id: &LearningId, f: F) -> Result<()>
    where
        F: FnOnce(&mut Learning),
    {
        let mut guard = self.inner.write().await;
        let learning = guard
            .learnings
            .get_mut(id)
            .ok_or_else(|| FlywheelError::LearningNotFound { id: id.to_string() })?;
        f(learning);
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create(&self, task: Task) -> Result<TaskId> {
        let mut guard = self.inner.write().await;
        if guard.tasks.contains_key(&task.id) {
            return Err(FlywheelError::store(
                "create task",
                format!("duplicate task id {}", task.id),
            ));
        }
        let id = task.id.clone();
        guard.tasks.insert(id.clone(), task);
        Ok(id)
    }

    async fn get(&self, id: &TaskId) -> Result<Task> {
        let guard = self.inner.read().await;
        guard
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| FlywheelError::TaskNotFound { id: id.clone() })
    }

    async fn update(&self, id: &TaskId, expected_version: u64, update: TaskUpdate) -> Result<Task> {
        let mut guard = self.inner.write().await;
        let task = guard
            .tasks
            .get_mut(id)
            .ok_or_else(|| FlywheelError::TaskNotFound { id: id.clone() })?;
        if task.version != expected_version {
            return Err(FlywheelError::Conflict {
                id: id.clone(),
                expected: expected_version,
                actual: task.version,
            });
        }
        // Apply to a copy so a rejected update leaves the stored task intact.
        let mut next = task.clone();
        update.apply(&mut next, Utc::now())?;
        *task = next.clone();
        Ok(next)
    }

    async fn query(&self, filter: &TaskFilter, order: TaskOrder, limit: usize) -> Result<Vec<Task>> {
        let guard = self.inner.read().await;
        let mut tasks: Vec<Task> = guard
            .tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| order.compare(a, b));
        tasks.truncate(limit);
        Ok(tasks)
    }
}

#[async_trait]
impl LearningStore for MemoryStore {
    async fn create(&self, learning: NewLearning) -> Result<LearningId> {
        let id = LearningId::generate();
        let record = Learning::from_new(id.clone(), learning, Utc::now());
        self.inner.write().await.learnings.insert(id.clone(), record);
        Ok(id)
    }

    async fn get(&self, id: &LearningId) -> Result<Learning> {
        let guard = self.inner.read().await;
        guard
            .learnings
            .get(id)
            .cloned()
            .ok_or_else(|| FlywheelError::LearningNotFound { id: id.to_string() })
    }

    async fn query(&self, query: &LearningQuery) -> Result<Vec<Learning>> {
        let guard = self.inner.read().await;
        Ok(select_learnings(query, guard.learnings.values()))
    }

    async fn increment_usage(&self, id: &LearningId, at: DateTime<Utc>) -> Result<()> {
        self.with_learning(id, |l| {
            l.usage_count += 1;
            l.last_used_at = Some(at);
        })
        .await
    }

    async fn record_success(&self, id: &LearningId) -> Result<()> {
        self.with_learning(id, |l| l.success_count += 1).await
    }

    async fn record_failure(&self, id: &LearningId, step: f64, clamp: bool) -> Result<()> {
        self.with_learning(id, |l| {
            l.failure_count += 1;
            l.decay(step, clamp);
        })
        .await
    }

    async fn count_by_type(&self) -> Result<BTreeMap<TaskType, usize>> {
        let guard = self.inner.read().await;
        let mut counts = BTreeMap::new();
        for learning in guard.learnings.values() {
            *counts.entry(learning.task_type).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
