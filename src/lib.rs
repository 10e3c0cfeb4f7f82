//! Flywheel - task automation core
//!
//! Tasks are attempted by type-specific automation first. Confident results
//! complete automatically; everything else is escalated to a human, and each
//! human resolution is distilled into a [`Learning`] that raises the
//! confidence of future automated attempts on similar tasks.
//!
//! # Architecture
//!
//! - [`task`] - the task record, its status machine and structured updates
//! - [`learning`] - learnings, context matching and synthesis
//! - [`store`] - persistence traits with in-memory and file-backed stores
//! - [`handler`] - the per-type automation trait and its registry
//! - [`engine`] - the lifecycle operations (process, escalate, complete, retry, sweep)
//! - [`api`] - request/response bodies and the structured error body
//! - [`config`] - thresholds and limits, loaded from `flywheel.toml`
//! - [`error`] - error types and their categories
//! - [`testing`] - mock handlers and failing stores
//!
//! # Example
//!
//! ```rust,ignore
//! use flywheel::{Engine, FlywheelConfig, HandlerRegistry, NewTask, TaskType};
//! use serde_json::json;
//!
//! let engine = Engine::in_memory(HandlerRegistry::placeholders(), FlywheelConfig::default())?;
//!
//! let task = engine
//!     .create_task(NewTask::new(TaskType::PermitSubmit, "P1", json!({"context": {"state": "TX"}})))
//!     .await?;
//! let outcome = engine.process_task(&task.id).await?;
//! println!("{} -> {}", outcome.task.id, outcome.task.status);
//! ```

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod handler;
pub mod learning;
pub mod store;
pub mod task;
pub mod testing;

// Re-export commonly used types
pub use error::{ErrorCategory, FlywheelError, IntoStoreError, Result};

pub use config::FlywheelConfig;

pub use engine::{
    CompletionOutcome, Engine, HumanCompletion, NewTask, ProcessOutcome, SweepReport, TaskStats,
};

pub use handler::{HandlerOutcome, HandlerRegistry, PlaceholderHandler, TaskHandler};

pub use learning::{Learning, LearningContext, LearningId, LearningQuery, NewLearning};

pub use store::{FileStore, LearningStore, MemoryStore, TaskFilter, TaskOrder, TaskStore};

pub use task::{Priority, Task, TaskId, TaskStatus, TaskType, TaskUpdate};
