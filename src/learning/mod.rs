//! Learnings: reusable resolution patterns captured from human work.
//!
//! A [`Learning`] is synthesized exactly once, when a human completes a task
//! (see [`synthesis`]), and is afterwards only updated in place through the
//! store's counter operations. Later tasks of the same type fetch matching
//! learnings (see [`matching`]) before their handler runs.

pub mod matching;
pub mod synthesis;

pub use matching::{compare_learnings, select_learnings, ContextFilter, ContextKey, LearningQuery};
pub use synthesis::LearningSynthesizer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::task::{TaskId, TaskType};

/// Opaque learning identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LearningId(String);

impl LearningId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LearningId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LearningId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Free-form key/value context (jurisdiction, state, zip code, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LearningContext(Map<String, Value>);

impl LearningContext {
    #[must_use]
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Read the `context` object out of a task input payload.
    ///
    /// Returns `None` when the input has no `context` or it is not an object.
    #[must_use]
    pub fn from_input(input: &Value) -> Option<Self> {
        input
            .get("context")
            .and_then(Value::as_object)
            .map(|fields| Self(fields.clone()))
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Value> for LearningContext {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(fields) => Self(fields),
            _ => Self::default(),
        }
    }
}

/// What differed between the automated attempt and the human resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningDelta {
    /// Confidence of the last automated attempt, if one ran.
    pub ai_confidence: Option<f64>,
    pub human_provided: bool,
}

/// Fields of a learning about to be created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLearning {
    pub task_type: TaskType,
    pub context: LearningContext,
    pub pattern: String,
    pub human_action: String,
    pub human_input: Option<Value>,
    pub ai_attempted_output: Option<Value>,
    pub delta: LearningDelta,
    pub confidence: f64,
    pub created_by: String,
    pub source_task_id: Option<TaskId>,
}

/// A stored, reusable resolution pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Learning {
    pub id: LearningId,
    pub task_type: TaskType,
    #[serde(default)]
    pub context: LearningContext,
    pub pattern: String,
    pub human_action: String,
    #[serde(default)]
    pub human_input: Option<Value>,
    #[serde(default)]
    pub ai_attempted_output: Option<Value>,
    pub delta: LearningDelta,
    pub confidence: f64,
    pub usage_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub trainable: bool,
    pub created_by: String,
    #[serde(default)]
    pub source_task_id: Option<TaskId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Learning {
    /// Materialize a new learning with zeroed counters.
    #[must_use]
    pub fn from_new(id: LearningId, new: NewLearning, now: DateTime<Utc>) -> Self {
        Self {
            id,
            task_type: new.task_type,
            context: new.context,
            pattern: new.pattern,
            human_action: new.human_action,
            human_input: new.human_input,
            ai_attempted_output: new.ai_attempted_output,
            delta: new.delta,
            confidence: new.confidence,
            usage_count: 0,
            success_count: 0,
            failure_count: 0,
            trainable: true,
            created_by: new.created_by,
            source_task_id: new.source_task_id,
            created_at: now,
            last_used_at: None,
        }
    }

    /// Lower confidence by `step` after a failed application.
    ///
    /// With `clamp` the result stays in `[0, 1]`; without it the value may go
    /// negative.
    pub fn decay(&mut self, step: f64, clamp: bool) {
        let next = self.confidence - step;
        self.confidence = if clamp { next.clamp(0.0, 1.0) } else { next };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn learning(confidence: f64) -> Learning {
        Learning::from_new(
            LearningId::from("l-1"),
            NewLearning {
                task_type: TaskType::PermitSubmit,
                context: LearningContext::from(json!({"state": "TX"})),
                pattern: "p".into(),
                human_action: "a".into(),
                human_input: None,
                ai_attempted_output: None,
                delta: LearningDelta {
                    ai_confidence: Some(0.0),
                    human_provided: true,
                },
                confidence,
                created_by: "system".into(),
                source_task_id: None,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_from_new_zeroes_counters() {
        let l = learning(0.5);
        assert_eq!(l.usage_count, 0);
        assert_eq!(l.success_count, 0);
        assert_eq!(l.failure_count, 0);
        assert!(l.trainable);
        assert!(l.last_used_at.is_none());
    }

    #[test]
    fn test_context_from_input() {
        let ctx = LearningContext::from_input(&json!({"context": {"zipCode": "78701"}})).unwrap();
        assert_eq!(ctx.get("zipCode"), Some(&json!("78701")));
        assert!(LearningContext::from_input(&json!({"context": "TX"})).is_none());
        assert!(LearningContext::from_input(&json!({})).is_none());
    }

    #[test]
    fn test_decay_clamped_floors_at_zero() {
        let mut l = learning(0.05);
        l.decay(0.1, true);
        assert_eq!(l.confidence, 0.0);
    }

    #[test]
    fn test_decay_unclamped_goes_negative() {
        let mut l = learning(0.05);
        l.decay(0.1, false);
        assert!(l.confidence < 0.0);
    }
}
