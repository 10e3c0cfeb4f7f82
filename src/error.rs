//! Custom error types for Flywheel.
//!
//! Every rejection an operation can produce is a [`FlywheelError`]. Each
//! variant belongs to exactly one [`ErrorCategory`], which is what callers
//! (and the UI behind them) use to decide between offering a retry and
//! asking the user to correct their input.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::task::{TaskId, TaskStatus, TaskType};

/// Main error type for Flywheel operations
#[derive(Error, Debug)]
pub enum FlywheelError {
    // =========================================================================
    // Validation Errors
    // =========================================================================
    /// A required field is missing or has an invalid value
    #[error("Invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    /// Unknown task type string
    #[error("Unknown task type: {value}")]
    UnknownTaskType { value: String },

    /// Unknown task status string
    #[error("Unknown task status: {value}")]
    UnknownStatus { value: String },

    // =========================================================================
    // Precondition / State Errors
    // =========================================================================
    /// Task does not exist
    #[error("Task not found: {id}")]
    TaskNotFound { id: TaskId },

    /// Learning does not exist
    #[error("Learning not found: {id}")]
    LearningNotFound { id: String },

    /// Operation is not allowed from the task's current status
    #[error("Cannot {operation} task {id} in status '{status}' (allowed: {allowed})")]
    InvalidState {
        id: TaskId,
        operation: &'static str,
        status: TaskStatus,
        allowed: String,
    },

    /// Retry limit reached
    #[error(
        "Task {id} has used {retry_count}/{max_retries} retries - escalate it or raise maxRetries"
    )]
    RetryLimit {
        id: TaskId,
        retry_count: u32,
        max_retries: u32,
    },

    /// Learning data may only be written once per task
    #[error("Learning data already recorded for task {id}")]
    LearningDataAlreadySet { id: TaskId },

    /// Conditional write lost a race with another writer
    #[error("Task {id} was modified concurrently (expected version {expected}, found {actual})")]
    Conflict {
        id: TaskId,
        expected: u64,
        actual: u64,
    },

    // =========================================================================
    // Handler Errors
    // =========================================================================
    /// A type-specific handler failed
    #[error("Handler for '{task_type}' failed: {message}")]
    Handler { task_type: TaskType, message: String },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    /// No handler registered for a task type
    #[error("No handler registered for task type '{task_type}'")]
    MissingHandler { task_type: TaskType },

    // =========================================================================
    // Store / Infrastructure Errors
    // =========================================================================
    /// Store operation failed
    #[error("Store error during {operation}: {message}")]
    Store { operation: String, message: String },

    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Broad classification of a [`FlywheelError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Caller input was invalid; correct and resubmit.
    Validation,
    /// The referenced entity does not exist.
    NotFound,
    /// Operation not permitted from the current state.
    Precondition,
    /// Another writer changed the task first.
    Conflict,
    /// A task handler failed.
    Handler,
    /// Store or IO failure.
    Infrastructure,
    /// Deployment misconfiguration.
    Configuration,
}

impl ErrorCategory {
    /// Whether retrying the same request unchanged can succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict | Self::Handler | Self::Infrastructure)
    }

    /// Stable code string used in structured error bodies.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Precondition => "precondition",
            Self::Conflict => "conflict",
            Self::Handler => "handler",
            Self::Infrastructure => "infrastructure",
            Self::Configuration => "configuration",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FlywheelError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create an invalid field error
    pub fn invalid_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a store error
    pub fn store(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create an invalid state error listing the statuses that were allowed
    pub fn invalid_state(
        id: &TaskId,
        operation: &'static str,
        status: TaskStatus,
        allowed: &[TaskStatus],
    ) -> Self {
        let allowed = allowed
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Self::InvalidState {
            id: id.clone(),
            operation,
            status,
            allowed,
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Get the category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidField { .. } | Self::UnknownTaskType { .. } | Self::UnknownStatus { .. } => {
                ErrorCategory::Validation
            }
            Self::TaskNotFound { .. } | Self::LearningNotFound { .. } => ErrorCategory::NotFound,
            Self::InvalidState { .. }
            | Self::RetryLimit { .. }
            | Self::LearningDataAlreadySet { .. } => ErrorCategory::Precondition,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::Handler { .. } => ErrorCategory::Handler,
            Self::Config { .. } | Self::InvalidConfig { .. } | Self::MissingHandler { .. } => {
                ErrorCategory::Configuration
            }
            Self::Store { .. } | Self::Io(_) | Self::Json(_) | Self::Other(_) => {
                ErrorCategory::Infrastructure
            }
        }
    }

    /// Check if the same request may succeed when retried
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Stable machine-readable code for this variant
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidField { .. } => "invalid_field",
            Self::UnknownTaskType { .. } => "unknown_task_type",
            Self::UnknownStatus { .. } => "unknown_status",
            Self::TaskNotFound { .. } => "task_not_found",
            Self::LearningNotFound { .. } => "learning_not_found",
            Self::InvalidState { .. } => "invalid_state",
            Self::RetryLimit { .. } => "retry_limit",
            Self::LearningDataAlreadySet { .. } => "learning_data_already_set",
            Self::Conflict { .. } => "conflict",
            Self::Handler { .. } => "handler_failed",
            Self::Config { .. } => "config",
            Self::InvalidConfig { .. } => "invalid_config",
            Self::MissingHandler { .. } => "missing_handler",
            Self::Store { .. } => "store",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Other(_) => "internal",
        }
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self.category() {
            ErrorCategory::Validation => 2,
            ErrorCategory::Precondition | ErrorCategory::NotFound => 3,
            ErrorCategory::Conflict => 4,
            ErrorCategory::Configuration => 7,
            ErrorCategory::Handler | ErrorCategory::Infrastructure => 1,
        }
    }
}

/// Type alias for Flywheel results
pub type Result<T> = std::result::Result<T, FlywheelError>;

/// Extension trait for converting foreign errors into store errors
pub trait IntoStoreError<T> {
    fn into_store_error(self, operation: &str) -> Result<T>;
}

impl<T, E: Into<anyhow::Error>> IntoStoreError<T> for std::result::Result<T, E> {
    fn into_store_error(self, operation: &str) -> Result<T> {
        self.map_err(|e| FlywheelError::store(operation, e.into().to_string()))
    }
}
