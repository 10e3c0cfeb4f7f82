//! Learning lookup for a task about to be processed.
//!
//! The lookup always filters on task type and narrows by at most one context
//! field, picked by specificity:
//!
//! ```text
//! jurisdiction  >  zipCode  >  state
//! ```
//!
//! The first of those present in the task context becomes the only extra
//! equality filter. Remaining context fields are left to the handler, which
//! receives the whole result set and can post-filter in memory.
//!
//! Results are ordered by confidence, highest first. Ties are broken by
//! `lastUsedAt` (most recent first, never-used last), then `createdAt`
//! (newest first), then id, so the order is fully deterministic.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use super::{Learning, LearningContext};
use crate::task::TaskType;

/// Context fields that may narrow a learning lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextKey {
    #[serde(rename = "jurisdiction")]
    Jurisdiction,
    #[serde(rename = "zipCode")]
    ZipCode,
    #[serde(rename = "state")]
    State,
}

impl ContextKey {
    /// Keys in decreasing specificity.
    pub const BY_SPECIFICITY: [ContextKey; 3] =
        [ContextKey::Jurisdiction, ContextKey::ZipCode, ContextKey::State];

    /// Field name inside the context object.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKey::Jurisdiction => "jurisdiction",
            ContextKey::ZipCode => "zipCode",
            ContextKey::State => "state",
        }
    }
}

/// A single equality filter on a context field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextFilter {
    pub key: ContextKey,
    pub value: Value,
}

/// A learning lookup as executed by a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningQuery {
    pub task_type: TaskType,
    pub filter: Option<ContextFilter>,
    pub limit: usize,
}

impl LearningQuery {
    /// Build the lookup for a task of `task_type` with an optional context.
    ///
    /// # Example
    ///
    /// ```
    /// use flywheel::learning::{ContextKey, LearningContext, LearningQuery};
    /// use flywheel::task::TaskType;
    /// use serde_json::json;
    ///
    /// let ctx = LearningContext::from(json!({"state": "TX", "jurisdiction": "Austin"}));
    /// let query = LearningQuery::for_task(TaskType::PermitSubmit, Some(&ctx), 10);
    /// assert_eq!(query.filter.unwrap().key, ContextKey::Jurisdiction);
    /// ```
    #[must_use]
    pub fn for_task(task_type: TaskType, context: Option<&LearningContext>, limit: usize) -> Self {
        let filter = context.and_then(|ctx| {
            ContextKey::BY_SPECIFICITY.into_iter().find_map(|key| {
                ctx.get(key.as_str())
                    .filter(|v| !v.is_null())
                    .map(|value| ContextFilter {
                        key,
                        value: value.clone(),
                    })
            })
        });
        Self {
            task_type,
            filter,
            limit,
        }
    }

    /// Whether a learning passes the type and context filters.
    #[must_use]
    pub fn matches(&self, learning: &Learning) -> bool {
        if learning.task_type != self.task_type {
            return false;
        }
        match &self.filter {
            Some(filter) => learning.context.get(filter.key.as_str()) == Some(&filter.value),
            None => true,
        }
    }
}

/// Total order used for learning results: best candidate first.
#[must_use]
pub fn compare_learnings(a: &Learning, b: &Learning) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| match (a.last_used_at, b.last_used_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Run `query` over a set of learnings: filter, order, cap.
pub fn select_learnings<'a, I>(query: &LearningQuery, learnings: I) -> Vec<Learning>
where
    I: IntoIterator<Item = &'a Learning>,
{
    let mut matched: Vec<Learning> = learnings
        .into_iter()
        .filter(|l| query.matches(l))
        .cloned()
        .collect();
    matched.sort_by(compare_learnings);
    matched.truncate(query.limit);
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::{LearningDelta, LearningId, NewLearning};
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn learning(id: &str, task_type: TaskType, context: Value, confidence: f64) -> Learning {
        Learning::from_new(
            LearningId::from(id),
            NewLearning {
                task_type,
                context: LearningContext::from(context),
                pattern: format!("pattern {id}"),
                human_action: "filed".into(),
                human_input: None,
                ai_attempted_output: None,
                delta: LearningDelta {
                    ai_confidence: None,
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
    fn test_no_context_means_no_filter() {
        let q = LearningQuery::for_task(TaskType::PermitCheck, None, 10);
        assert!(q.filter.is_none());
    }

    #[test]
    fn test_specificity_priority() {
        let ctx = LearningContext::from(json!({"state": "TX", "zipCode": "78701"}));
        let q = LearningQuery::for_task(TaskType::PermitSubmit, Some(&ctx), 10);
        assert_eq!(
            q.filter,
            Some(ContextFilter {
                key: ContextKey::ZipCode,
                value: json!("78701")
            })
        );

        let ctx = LearningContext::from(json!({"state": "TX", "county": "Travis"}));
        let q = LearningQuery::for_task(TaskType::PermitSubmit, Some(&ctx), 10);
        assert_eq!(q.filter.unwrap().key, ContextKey::State);
    }

    #[test]
    fn test_unrecognised_context_fields_do_not_filter() {
        let ctx = LearningContext::from(json!({"county": "Travis"}));
        let q = LearningQuery::for_task(TaskType::PermitSubmit, Some(&ctx), 10);
        assert!(q.filter.is_none());
    }

    #[test]
    fn test_higher_confidence_selected_first() {
        let low = learning(
            "low",
            TaskType::PermitSubmit,
            json!({"jurisdiction": "Austin"}),
            0.6,
        );
        let high = learning(
            "high",
            TaskType::PermitSubmit,
            json!({"jurisdiction": "Austin"}),
            0.85,
        );
        let other_place = learning(
            "elsewhere",
            TaskType::PermitSubmit,
            json!({"jurisdiction": "Dallas"}),
            0.99,
        );
        let other_type = learning(
            "cad",
            TaskType::CadGenerate,
            json!({"jurisdiction": "Austin"}),
            0.99,
        );
        let ctx = LearningContext::from(json!({"jurisdiction": "Austin", "state": "TX"}));
        let q = LearningQuery::for_task(TaskType::PermitSubmit, Some(&ctx), 10);

        let all = [low, high, other_place, other_type];
        let selected = select_learnings(&q, all.iter());
        let ids: Vec<&str> = selected.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "low"]);
    }

    #[test]
    fn test_limit_caps_results() {
        let all: Vec<Learning> = (0..15)
            .map(|i| {
                learning(
                    &format!("l{i:02}"),
                    TaskType::SurveyProcess,
                    json!({}),
                    f64::from(i) / 20.0,
                )
            })
            .collect();
        let q = LearningQuery::for_task(TaskType::SurveyProcess, None, 10);
        let selected = select_learnings(&q, all.iter());
        assert_eq!(selected.len(), 10);
        assert_eq!(selected[0].id.as_str(), "l14");
    }

    #[test]
    fn test_tie_break_prefers_recently_used() {
        let now = Utc::now();
        let mut never = learning("a-never", TaskType::PermitSubmit, json!({}), 0.7);
        let mut old = learning("b-old", TaskType::PermitSubmit, json!({}), 0.7);
        let mut recent = learning("c-recent", TaskType::PermitSubmit, json!({}), 0.7);
        never.created_at = now;
        old.created_at = now;
        recent.created_at = now;
        old.last_used_at = Some(now - Duration::hours(2));
        recent.last_used_at = Some(now - Duration::minutes(1));

        let q = LearningQuery::for_task(TaskType::PermitSubmit, None, 10);
        let all = [never, old, recent];
        let selected = select_learnings(&q, all.iter());
        let ids: Vec<&str> = selected.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["c-recent", "b-old", "a-never"]);
    }

    #[test]
    fn test_tie_break_falls_back_to_id() {
        let now = Utc::now();
        let mut b = learning("b", TaskType::PermitSubmit, json!({}), 0.5);
        let mut a = learning("a", TaskType::PermitSubmit, json!({}), 0.5);
        a.created_at = now;
        b.created_at = now;
        assert_eq!(compare_learnings(&a, &b), Ordering::Less);
    }
}
