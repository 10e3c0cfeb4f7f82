//! Build a learning from a human-completed task.

use super::{LearningDelta, NewLearning};
use crate::task::Task;

/// Identity recorded when nobody was assigned to the task.
pub const SYSTEM_ACTOR: &str = "system";

/// Turns the delta between an automated attempt and a human resolution into
/// a [`NewLearning`].
#[derive(Debug, Clone)]
pub struct LearningSynthesizer {
    seed_confidence: f64,
}

impl LearningSynthesizer {
    #[must_use]
    pub fn new(seed_confidence: f64) -> Self {
        Self { seed_confidence }
    }

    /// The delta recorded both on the learning and in the task's learning data.
    #[must_use]
    pub fn delta(task: &Task) -> LearningDelta {
        LearningDelta {
            ai_confidence: task.ai_attempt.as_ref().map(|a| a.confidence),
            human_provided: true,
        }
    }

    /// Synthesize a learning from `task`, which must already carry the human
    /// resolution (`humanFallback.action`, `output`).
    #[must_use]
    pub fn synthesize(&self, task: &Task) -> NewLearning {
        let fallback = task.human_fallback.clone().unwrap_or_default();
        let action = fallback.action.unwrap_or_default();
        let context = task.context().unwrap_or_default();

        let mut pattern = format!("{} resolved by human: {}", task.task_type, action);
        if !context.is_empty() {
            let scope = context
                .iter()
                .map(|(k, v)| match v.as_str() {
                    Some(s) => format!("{k}={s}"),
                    None => format!("{k}={v}"),
                })
                .collect::<Vec<_>>()
                .join(", ");
            pattern.push_str(&format!(" ({scope})"));
        }

        NewLearning {
            task_type: task.task_type,
            context,
            pattern,
            human_action: action,
            human_input: task.output.clone(),
            ai_attempted_output: task.ai_attempt.as_ref().and_then(|a| a.result.clone()),
            delta: Self::delta(task),
            confidence: self.seed_confidence,
            created_by: fallback
                .assigned_to
                .unwrap_or_else(|| SYSTEM_ACTOR.to_string()),
            source_task_id: Some(task.id.clone()),
        }
    }
}
