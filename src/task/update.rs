//! Structured write commands for tasks.
//!
//! Stores never patch tasks field-by-field from the outside. A caller
//! describes a write as a [`TaskUpdate`] and the store applies it with
//! [`TaskUpdate::apply`], which enforces the transition table, the
//! write-once rule for learning data, and stamps `updatedAt` / `version`.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{AiAttempt, HumanFallback, LearningData, Task, TaskStatus};
use crate::error::{FlywheelError, Result};
use crate::learning::LearningId;

/// Final fields of an automated attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AiAttemptOutcome {
    pub completed_at: DateTime<Utc>,
    pub result: Option<Value>,
    pub confidence: f64,
    pub error: Option<String>,
    pub learnings_applied: Vec<LearningId>,
}

/// Write command for [`AiAttempt`].
#[derive(Debug, Clone, PartialEq)]
pub enum AiAttemptUpdate {
    /// Replace the attempt with a freshly started one.
    Begin { started_at: DateTime<Utc> },
    /// Record how the current attempt ended.
    Finish(AiAttemptOutcome),
}

/// A human assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub assigned_to: String,
    pub assigned_at: DateTime<Utc>,
}

/// Write command for [`HumanFallback`].
#[derive(Debug, Clone, PartialEq)]
pub enum HumanFallbackUpdate {
    /// Route to a human, optionally assigning someone.
    Escalate {
        reason: String,
        escalated_by: String,
        escalated_at: DateTime<Utc>,
        assignment: Option<Assignment>,
    },
    /// Record the human resolution.
    Complete {
        completed_by: String,
        completed_at: DateTime<Utc>,
        action: String,
        notes: Option<String>,
        output: Option<Value>,
    },
    /// Drop the current assignment.
    Release,
}

/// A write against a single task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub output: Option<Value>,
    pub retry_count: Option<u32>,
    pub ai_attempt: Option<AiAttemptUpdate>,
    pub human_fallback: Option<HumanFallbackUpdate>,
    pub learning_data: Option<LearningData>,
}

impl TaskUpdate {
    /// An update that moves the task to `status`.
    #[must_use]
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_output(mut self, output: Option<Value>) -> Self {
        self.output = output;
        self
    }

    #[must_use]
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    #[must_use]
    pub fn with_ai_attempt(mut self, update: AiAttemptUpdate) -> Self {
        self.ai_attempt = Some(update);
        self
    }

    #[must_use]
    pub fn with_human_fallback(mut self, update: HumanFallbackUpdate) -> Self {
        self.human_fallback = Some(update);
        self
    }

    #[must_use]
    pub fn with_learning_data(mut self, data: LearningData) -> Self {
        self.learning_data = Some(data);
        self
    }

    /// Apply the update to `task`.
    ///
    /// Validation happens before any field is touched, so a rejected update
    /// leaves the task unchanged.
    ///
    /// # Errors
    ///
    /// - [`FlywheelError::InvalidState`] if the status change is not in the
    ///   transition table
    /// - [`FlywheelError::LearningDataAlreadySet`] on a second learning-data write
    pub fn apply(self, task: &mut Task, now: DateTime<Utc>) -> Result<()> {
        if let Some(target) = self.status {
            if target != task.status && !task.status.can_transition_to(target) {
                return Err(FlywheelError::invalid_state(
                    &task.id,
                    "transition",
                    task.status,
                    &TaskStatus::ALL
                        .into_iter()
                        .filter(|s| task.status.can_transition_to(*s))
                        .collect::<Vec<_>>(),
                ));
            }
        }
        if self.learning_data.is_some() && task.learning_data.is_some() {
            return Err(FlywheelError::LearningDataAlreadySet {
                id: task.id.clone(),
            });
        }

        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(output) = self.output {
            task.output = Some(output);
        }
        if let Some(retry_count) = self.retry_count {
            task.retry_count = retry_count;
        }
        if let Some(update) = self.ai_attempt {
            apply_ai_attempt(task, update);
        }
        if let Some(update) = self.human_fallback {
            apply_human_fallback(task, update);
        }
        if let Some(data) = self.learning_data {
            task.learning_data = Some(data);
        }

        task.updated_at = now;
        task.version += 1;
        Ok(())
    }
}

fn apply_ai_attempt(task: &mut Task, update: AiAttemptUpdate) {
    match update {
        AiAttemptUpdate::Begin { started_at } => {
            task.ai_attempt = Some(AiAttempt::started(started_at));
        }
        AiAttemptUpdate::Finish(outcome) => {
            let attempt = task
                .ai_attempt
                .get_or_insert_with(|| AiAttempt::started(outcome.completed_at));
            attempt.completed_at = Some(outcome.completed_at);
            attempt.result = outcome.result;
            attempt.confidence = outcome.confidence;
            attempt.error = outcome.error;
            attempt.learnings_applied = outcome.learnings_applied;
        }
    }
}

fn apply_human_fallback(task: &mut Task, update: HumanFallbackUpdate) {
    let fallback = task.human_fallback.get_or_insert_with(HumanFallback::default);
    match update {
        HumanFallbackUpdate::Escalate {
            reason,
            escalated_by,
            escalated_at,
            assignment,
        } => {
            fallback.reason = Some(reason);
            fallback.escalated_by = Some(escalated_by);
            fallback.escalated_at = Some(escalated_at);
            match assignment {
                Some(a) => {
                    fallback.assigned_to = Some(a.assigned_to);
                    fallback.assigned_at = Some(a.assigned_at);
                }
                None => {
                    fallback.assigned_to = None;
                    fallback.assigned_at = None;
                }
            }
        }
        HumanFallbackUpdate::Complete {
            completed_by,
            completed_at,
            action,
            notes,
            output,
        } => {
            fallback.completed_by = Some(completed_by);
            fallback.completed_at = Some(completed_at);
            fallback.action = Some(action);
            fallback.notes = notes;
            fallback.output = output.clone();
            // The human's output replaces any automated result, even when empty
            task.output = output;
        }
        HumanFallbackUpdate::Release => {
            fallback.assigned_to = None;
            fallback.assigned_at = None;
        }
    }
}
