//! Task data model.
//!
//! A [`Task`] is one automatable unit of work. It is created `pending`,
//! mutated only through [`TaskUpdate`] commands applied by a store, and never
//! deleted by this crate.
//!
//! ```text
//! Task
//!   ├── id / type / projectId / input      (immutable after creation)
//!   ├── status / version                   (state machine + CAS guard)
//!   ├── aiAttempt                          (last automated attempt)
//!   ├── humanFallback                      (escalation + human resolution)
//!   └── learningData                       (written once, on completion)
//! ```

mod state;
mod update;

pub use state::TaskStatus;
pub use update::{AiAttemptOutcome, AiAttemptUpdate, Assignment, HumanFallbackUpdate, TaskUpdate};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{FlywheelError, Result};
use crate::learning::{LearningContext, LearningDelta, LearningId};

// ============================================================================
// Task Identifier
// ============================================================================

/// Opaque task identifier, assigned at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// Task Type
// ============================================================================

/// The closed set of automatable task kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    PermitSubmit,
    PermitCheck,
    CadGenerate,
    PhotoAnalyze,
    FundingSubmit,
    ScheduleMatch,
    SurveyProcess,
}

impl TaskType {
    /// Number of task types.
    pub const COUNT: usize = 7;

    /// Every task type, in declaration order.
    pub const ALL: [TaskType; TaskType::COUNT] = [
        TaskType::PermitSubmit,
        TaskType::PermitCheck,
        TaskType::CadGenerate,
        TaskType::PhotoAnalyze,
        TaskType::FundingSubmit,
        TaskType::ScheduleMatch,
        TaskType::SurveyProcess,
    ];

    /// Wire name of the type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::PermitSubmit => "permit_submit",
            TaskType::PermitCheck => "permit_check",
            TaskType::CadGenerate => "cad_generate",
            TaskType::PhotoAnalyze => "photo_analyze",
            TaskType::FundingSubmit => "funding_submit",
            TaskType::ScheduleMatch => "schedule_match",
            TaskType::SurveyProcess => "survey_process",
        }
    }

    /// Dense index in `0..COUNT`, used for per-type tables.
    #[must_use]
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = FlywheelError;

    fn from_str(s: &str) -> Result<Self> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| FlywheelError::UnknownTaskType {
                value: s.to_string(),
            })
    }
}

// ============================================================================
// Priority
// ============================================================================

/// Task priority: 1 (critical) to 5 (low).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const CRITICAL: Priority = Priority(1);
    pub const NORMAL: Priority = Priority(3);
    pub const LOW: Priority = Priority(5);

    /// Validate and wrap a raw priority.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `value` is outside `1..=5`.
    pub fn new(value: u8) -> Result<Self> {
        if (1..=5).contains(&value) {
            Ok(Self(value))
        } else {
            Err(FlywheelError::invalid_field(
                "priority",
                format!("must be between 1 and 5, got {value}"),
            ))
        }
    }

    #[must_use]
    pub fn get(&self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

impl TryFrom<u8> for Priority {
    type Error = FlywheelError;

    fn try_from(value: u8) -> Result<Self> {
        Priority::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(value: Priority) -> Self {
        value.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Sub-records
// ============================================================================

/// Record of the most recent automated attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiAttempt {
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub learnings_applied: Vec<LearningId>,
}

impl AiAttempt {
    /// A fresh attempt that has only started.
    #[must_use]
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            started_at: at,
            completed_at: None,
            result: None,
            confidence: 0.0,
            error: None,
            learnings_applied: Vec::new(),
        }
    }
}

/// Escalation and human-resolution details.
///
/// Every field is optional: a task can land in `human_needed` through low
/// confidence without anyone calling escalate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanFallback {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub escalated_by: Option<String>,
    #[serde(default)]
    pub escalated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_by: Option<String>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub output: Option<Value>,
}

/// Training record captured when a human completes a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningData {
    /// `None` when learning synthesis failed.
    pub learning_id: Option<LearningId>,
    pub ai_input: Value,
    pub human_output: Option<Value>,
    pub delta: LearningDelta,
    pub trainable: bool,
}

// ============================================================================
// Task
// ============================================================================

/// One automatable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub project_id: String,
    pub status: TaskStatus,
    pub input: Value,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub ai_attempt: Option<AiAttempt>,
    #[serde(default)]
    pub human_fallback: Option<HumanFallback>,
    #[serde(default)]
    pub learning_data: Option<LearningData>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Incremented by every write; conditional writes are keyed on it.
    pub version: u64,
}

impl Task {
    /// Build a new `pending` task.
    #[must_use]
    pub fn new(
        task_type: TaskType,
        project_id: impl Into<String>,
        input: Value,
        priority: Priority,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            task_type,
            project_id: project_id.into(),
            status: TaskStatus::Pending,
            input,
            output: None,
            ai_attempt: None,
            human_fallback: None,
            learning_data: None,
            retry_count: 0,
            max_retries,
            priority,
            created_at: now,
            updated_at: now,
            version: 1,
        }
    }

    /// Matching context carried in `input.context`, if any.
    #[must_use]
    pub fn context(&self) -> Option<LearningContext> {
        LearningContext::from_input(&self.input)
    }

    /// Whether another automated attempt is allowed.
    #[must_use]
    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Person currently assigned, if any.
    #[must_use]
    pub fn assigned_to(&self) -> Option<&str> {
        self.human_fallback
            .as_ref()
            .and_then(|h| h.assigned_to.as_deref())
    }

    /// When the task reached its resolution: human completion wins over the
    /// automated one.
    #[must_use]
    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.human_fallback
            .as_ref()
            .and_then(|h| h.completed_at)
            .or_else(|| self.ai_attempt.as_ref().and_then(|a| a.completed_at))
    }

    /// Fail with a precondition error unless the status is one of `allowed`.
    pub(crate) fn ensure_status(&self, operation: &'static str, allowed: &[TaskStatus]) -> Result<()> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(FlywheelError::invalid_state(
                &self.id,
                operation,
                self.status,
                allowed,
            ))
        }
    }
}
