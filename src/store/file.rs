//! JSON-on-disk store for the CLI.
//!
//! Wraps a [`MemoryStore`] and rewrites `tasks.json` / `learnings.json`
//! after every successful write. Files are replaced atomically (tmp file,
//! `sync_all`, rename) and the data directory is held under an exclusive
//! `fs2` lock for the lifetime of the store, so two processes can never
//! interleave writes to the same collections.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;

use super::{LearningStore, MemoryStore, TaskFilter, TaskOrder, TaskStore};
use crate::error::{FlywheelError, IntoStoreError, Result};
use crate::learning::{Learning, LearningId, LearningQuery, NewLearning};
use crate::task::{Task, TaskId, TaskType, TaskUpdate};

/// Task collection file name.
pub const TASKS_FILE: &str = "tasks.json";

/// Learning collection file name.
pub const LEARNINGS_FILE: &str = "learnings.json";

/// Lock file guarding the data directory.
pub const LOCK_FILE: &str = "store.lock";

/// Temporary file suffix for atomic writes.
const TMP_SUFFIX: &str = ".tmp";

/// File-backed implementation of [`TaskStore`] and [`LearningStore`].
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    inner: MemoryStore,
    /// Serializes snapshots so an older snapshot never overwrites a newer one.
    persist: Mutex<()>,
    _lock: File,
}

impl FileStore {
    /// Open (or create) a store in `dir`.
    ///
    /// # Errors
    ///
    /// - Store error if another process holds the directory lock
    /// - Store error if a collection file exists but cannot be parsed
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE))?;
        FileExt::try_lock_exclusive(&lock)
            .into_store_error(&format!("lock data directory {}", dir.display()))?;

        let tasks: Vec<Task> = read_collection(&dir.join(TASKS_FILE))?;
        let learnings: Vec<Learning> = read_collection(&dir.join(LEARNINGS_FILE))?;
        debug!(
            tasks = tasks.len(),
            learnings = learnings.len(),
            "Opened file store at {}",
            dir.display()
        );

        Ok(Self {
            dir,
            inner: MemoryStore::from_records(tasks, learnings),
            persist: Mutex::new(()),
            _lock: lock,
        })
    }

    /// Directory holding the collection files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn persist_tasks(&self) -> Result<()> {
        let _guard = self.persist.lock().await;
        let tasks = self.inner.all_tasks().await;
        write_collection(&self.dir.join(TASKS_FILE), &tasks)
    }

    async fn persist_learnings(&self) -> Result<()> {
        let _guard = self.persist.lock().await;
        let learnings = self.inner.all_learnings().await;
        write_collection(&self.dir.join(LEARNINGS_FILE), &learnings)
    }
}

fn read_collection<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).into_store_error(&format!("parse {}", path.display()))
}

fn write_collection<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FlywheelError::store("persist", "invalid collection path"))?;
    let tmp_path = path.with_file_name(format!("{file_name}{TMP_SUFFIX}"));

    let json = serde_json::to_string_pretty(records)?;
    let mut tmp_file = File::create(&tmp_path)?;
    tmp_file.write_all(json.as_bytes())?;
    tmp_file.sync_all()?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[async_trait]
impl TaskStore for FileStore {
    async fn create(&self, task: Task) -> Result<TaskId> {
        let id = TaskStore::create(&self.inner, task).await?;
        self.persist_tasks().await?;
        Ok(id)
    }

    async fn get(&self, id: &TaskId) -> Result<Task> {
        TaskStore::get(&self.inner, id).await
    }

    async fn update(&self, id: &TaskId, expected_version: u64, update: TaskUpdate) -> Result<Task> {
        let task = self.inner.update(id, expected_version, update).await?;
        self.persist_tasks().await?;
        Ok(task)
    }

    async fn query(&self, filter: &TaskFilter, order: TaskOrder, limit: usize) -> Result<Vec<Task>> {
        TaskStore::query(&self.inner, filter, order, limit).await
    }
}

#[async_trait]
impl LearningStore for FileStore {
    async fn create(&self, learning: NewLearning) -> Result<LearningId> {
        let id = LearningStore::create(&self.inner, learning).await?;
        self.persist_learnings().await?;
        Ok(id)
    }

    async fn get(&self, id: &LearningId) -> Result<Learning> {
        LearningStore::get(&self.inner, id).await
    }

    async fn query(&self, query: &LearningQuery) -> Result<Vec<Learning>> {
        LearningStore::query(&self.inner, query).await
    }

    async fn increment_usage(&self, id: &LearningId, at: DateTime<Utc>) -> Result<()> {
        self.inner.increment_usage(id, at).await?;
        self.persist_learnings().await
    }

    async fn record_success(&self, id: &LearningId) -> Result<()> {
        self.inner.record_success(id).await?;
        self.persist_learnings().await
    }

    async fn record_failure(&self, id: &LearningId, step: f64, clamp: bool) -> Result<()> {
        self.inner.record_failure(id, step, clamp).await?;
        self.persist_learnings().await
    }

    async fn count_by_type(&self) -> Result<BTreeMap<TaskType, usize>> {
        self.inner.count_by_type().await
    }
}
