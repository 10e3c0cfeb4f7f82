//! Task status and the transition table.
//!
//! ```text
//! pending ──process──> ai_processing ──┬──> ai_completed        (terminal)
//!    ▲                                 ├──> ai_failed ──retry──┐
//!    │                                 └──> human_needed       │
//!    └──────────────retry──────────────────────┘ │    ▲        │
//!                                                 ▼    │ release│
//!                                        human_processing       │
//!                                                 │             │
//!                                          complete             │
//!                                                 ▼             │
//!                                             learning ──> human_completed (terminal)
//! ```
//!
//! `ai_failed` loops back through `ai_processing` on the next attempt.
//! Escalation to `human_needed` / `human_processing` is legal from every
//! status so an operator can always pull a task out of automation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FlywheelError;

/// Current lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, waiting for an automated attempt
    #[default]
    Pending,
    /// A handler is running
    AiProcessing,
    /// Resolved automatically
    AiCompleted,
    /// The handler failed; may be retried
    AiFailed,
    /// Waiting for a human
    HumanNeeded,
    /// Claimed by a human
    HumanProcessing,
    /// Human finished; learning synthesis in progress
    Learning,
    /// Resolved by a human
    HumanCompleted,
}

impl TaskStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [TaskStatus; 8] = [
        TaskStatus::Pending,
        TaskStatus::AiProcessing,
        TaskStatus::AiCompleted,
        TaskStatus::AiFailed,
        TaskStatus::HumanNeeded,
        TaskStatus::HumanProcessing,
        TaskStatus::Learning,
        TaskStatus::HumanCompleted,
    ];

    /// Statuses from which `process_task` may start.
    pub const PROCESSABLE: [TaskStatus; 2] = [TaskStatus::Pending, TaskStatus::AiFailed];

    /// Statuses from which `retry_ai_task` may start.
    pub const RETRYABLE: [TaskStatus; 2] = [TaskStatus::AiFailed, TaskStatus::HumanNeeded];

    /// Statuses from which `complete_human_task` may start.
    pub const AWAITING_HUMAN: [TaskStatus; 2] =
        [TaskStatus::HumanNeeded, TaskStatus::HumanProcessing];

    /// Wire name of the status.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::AiProcessing => "ai_processing",
            TaskStatus::AiCompleted => "ai_completed",
            TaskStatus::AiFailed => "ai_failed",
            TaskStatus::HumanNeeded => "human_needed",
            TaskStatus::HumanProcessing => "human_processing",
            TaskStatus::Learning => "learning",
            TaskStatus::HumanCompleted => "human_completed",
        }
    }

    /// Check if this status can transition to the target status.
    ///
    /// # Example
    ///
    /// ```
    /// use flywheel::task::TaskStatus;
    ///
    /// assert!(TaskStatus::Pending.can_transition_to(TaskStatus::AiProcessing));
    /// assert!(!TaskStatus::AiCompleted.can_transition_to(TaskStatus::AiProcessing));
    /// // Escalation is always allowed
    /// assert!(TaskStatus::AiCompleted.can_transition_to(TaskStatus::HumanNeeded));
    /// ```
    #[must_use]
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        use TaskStatus::*;
        if matches!(target, HumanNeeded | HumanProcessing) {
            return true;
        }
        matches!(
            (self, target),
            (Pending, AiProcessing)
                | (AiFailed, AiProcessing)
                | (AiProcessing, AiCompleted)
                | (AiProcessing, AiFailed)
                | (AiFailed, Pending)
                | (HumanNeeded, Pending)
                | (HumanNeeded, Learning)
                | (HumanProcessing, Learning)
                | (Learning, HumanCompleted)
        )
    }

    /// Check if this status is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::AiCompleted | TaskStatus::HumanCompleted)
    }

    /// Check if this status is an in-flight phase that can be stranded by a
    /// crashed or timed-out invocation.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            TaskStatus::AiProcessing | TaskStatus::HumanProcessing | TaskStatus::Learning
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = FlywheelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| FlywheelError::UnknownStatus {
                value: s.to_string(),
            })
    }
}
