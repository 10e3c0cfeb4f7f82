//! Pluggable per-type task handlers.
//!
//! Each [`TaskType`] maps to exactly one [`TaskHandler`]. The mapping is a
//! fixed table indexed by the enum, built once at startup by
//! [`HandlerRegistryBuilder`]; a registry missing any type fails to build,
//! so a lookup can never miss while tasks are being processed.
//!
//! The domain automation (permit portals, CAD generation, photo analysis and
//! so on) lives outside this crate. Until a real handler is plugged in, the
//! [`PlaceholderHandler`] reports zero confidence and no result, which sends
//! every task to a human.

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::{FlywheelError, Result};
use crate::learning::Learning;
use crate::task::TaskType;

/// What a handler reports for one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerOutcome {
    /// Trust in `result`, nominally in `[0, 1]`.
    pub confidence: f64,
    pub result: Option<Value>,
    /// Non-fatal diagnostic recorded on the attempt.
    pub error: Option<String>,
}

impl HandlerOutcome {
    /// Outcome carrying a result at the given confidence.
    #[must_use]
    pub fn new(confidence: f64, result: Value) -> Self {
        Self {
            confidence,
            result: Some(result),
            error: None,
        }
    }

    /// Zero confidence, no result.
    #[must_use]
    pub fn unhandled() -> Self {
        Self {
            confidence: 0.0,
            result: None,
            error: None,
        }
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Confidence forced into `[0, 1]`; NaN counts as zero.
    #[must_use]
    pub fn sanitized_confidence(&self) -> f64 {
        if self.confidence.is_nan() {
            0.0
        } else {
            self.confidence.clamp(0.0, 1.0)
        }
    }
}

/// Automation strategy for one task type.
///
/// Returning `Err` is a handler failure: it is recorded on the task and
/// drives the retry/escalation path, it is never surfaced to the caller.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Attempt the task.
    ///
    /// `learnings` are the matched learnings for this task, best first. Only
    /// the type and one context field were used to select them, so a handler
    /// that cares about other context fields must filter them itself.
    async fn handle(&self, input: &Value, learnings: &[Learning]) -> AnyResult<HandlerOutcome>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "handler"
    }
}

/// Handler used when no real automation exists for a type.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderHandler;

#[async_trait]
impl TaskHandler for PlaceholderHandler {
    async fn handle(&self, _input: &Value, _learnings: &[Learning]) -> AnyResult<HandlerOutcome> {
        Ok(HandlerOutcome::unhandled())
    }

    fn name(&self) -> &str {
        "placeholder"
    }
}

/// Complete type → handler table.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: [Arc<dyn TaskHandler>; TaskType::COUNT],
}

impl HandlerRegistry {
    /// Start building a registry.
    #[must_use]
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Registry with [`PlaceholderHandler`] for every type.
    #[must_use]
    pub fn placeholders() -> Self {
        Self {
            handlers: std::array::from_fn(|_| {
                Arc::new(PlaceholderHandler) as Arc<dyn TaskHandler>
            }),
        }
    }

    /// Handler for `task_type`.
    #[must_use]
    pub fn get(&self, task_type: TaskType) -> &Arc<dyn TaskHandler> {
        &self.handlers[task_type.index()]
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::placeholders()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for task_type in TaskType::ALL {
            map.entry(&task_type.as_str(), &self.get(task_type).name());
        }
        map.finish()
    }
}

/// Collects handlers until every type is covered.
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: [Option<Arc<dyn TaskHandler>>; TaskType::COUNT],
}

impl HandlerRegistryBuilder {
    /// Register `handler` for `task_type`, replacing any earlier one.
    #[must_use]
    pub fn register(mut self, task_type: TaskType, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers[task_type.index()] = Some(handler);
        self
    }

    /// Register [`PlaceholderHandler`] for every type still unset.
    #[must_use]
    pub fn fill_placeholders(mut self) -> Self {
        for slot in &mut self.handlers {
            if slot.is_none() {
                *slot = Some(Arc::new(PlaceholderHandler));
            }
        }
        self
    }

    /// Finish the registry.
    ///
    /// # Errors
    ///
    /// Returns [`FlywheelError::MissingHandler`] for the first type without
    /// a handler.
    pub fn build(self) -> Result<HandlerRegistry> {
        let mut handlers: Vec<Arc<dyn TaskHandler>> = Vec::with_capacity(TaskType::COUNT);
        for (task_type, slot) in TaskType::ALL.into_iter().zip(self.handlers) {
            match slot {
                Some(handler) => handlers.push(handler),
                None => return Err(FlywheelError::MissingHandler { task_type }),
            }
        }
        let handlers: [Arc<dyn TaskHandler>; TaskType::COUNT] = handlers
            .try_into()
            .map_err(|_| FlywheelError::config("handler table size mismatch"))?;
        Ok(HandlerRegistry { handlers })
    }
}
