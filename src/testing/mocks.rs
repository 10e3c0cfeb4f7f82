//! Mock handler and store wrappers.

use anyhow::{bail, Result as AnyResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{FlywheelError, Result};
use crate::handler::{HandlerOutcome, TaskHandler};
use crate::learning::{Learning, LearningId, LearningQuery, NewLearning};
use crate::store::LearningStore;
use crate::task::TaskType;

#[derive(Debug, Clone)]
enum Behavior {
    Confident(f64),
    Failing(String),
    Panicking(String),
}

/// Scriptable [`TaskHandler`].
///
/// Thread-safe; counts invocations so tests can assert a handler ran
/// exactly once under concurrency.
///
/// # Example
///
/// ```rust,ignore
/// let handler = MockHandler::failing("portal down");
/// assert!(handler.handle(&json!({}), &[]).await.is_err());
/// assert_eq!(handler.invocations(), 1);
/// ```
#[derive(Debug)]
pub struct MockHandler {
    behavior: Behavior,
    result: Option<Value>,
    delay: Option<Duration>,
    invocations: AtomicU32,
    last_learning_count: AtomicUsize,
}

impl Default for MockHandler {
    fn default() -> Self {
        Self::confident(0.0)
    }
}

impl MockHandler {
    /// Succeed with `confidence` and no result.
    #[must_use]
    pub fn confident(confidence: f64) -> Self {
        Self::with_behavior(Behavior::Confident(confidence))
    }

    /// Return an error carrying `message`.
    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self::with_behavior(Behavior::Failing(message.to_string()))
    }

    /// Panic with `message`.
    #[must_use]
    pub fn panicking(message: &str) -> Self {
        Self::with_behavior(Behavior::Panicking(message.to_string()))
    }

    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            result: None,
            delay: None,
            invocations: AtomicU32::new(0),
            last_learning_count: AtomicUsize::new(0),
        }
    }

    /// Result reported alongside the confidence.
    #[must_use]
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    /// Sleep before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of times `handle` was called.
    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Number of learnings passed to the most recent call.
    pub fn last_learning_count(&self) -> usize {
        self.last_learning_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for MockHandler {
    async fn handle(&self, _input: &Value, learnings: &[Learning]) -> AnyResult<HandlerOutcome> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        self.last_learning_count
            .store(learnings.len(), Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.behavior {
            Behavior::Confident(confidence) => Ok(HandlerOutcome {
                confidence: *confidence,
                result: self.result.clone(),
                error: None,
            }),
            Behavior::Failing(message) => bail!("{}", message),
            Behavior::Panicking(message) => panic!("{}", message),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// [`LearningStore`] whose `create` always fails; everything else is
/// delegated.
pub struct FailingLearningStore {
    inner: Arc<dyn LearningStore>,
}

impl FailingLearningStore {
    #[must_use]
    pub fn new(inner: Arc<dyn LearningStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl LearningStore for FailingLearningStore {
    async fn create(&self, _learning: NewLearning) -> Result<LearningId> {
        Err(FlywheelError::store("create learning", "injected failure"))
    }

    async fn get(&self, id: &LearningId) -> Result<Learning> {
        self.inner.get(id).await
    }

    async fn query(&self, query: &LearningQuery) -> Result<Vec<Learning>> {
        self.inner.query(query).await
    }

    async fn increment_usage(&self, id: &LearningId, at: DateTime<Utc>) -> Result<()> {
        self.inner.increment_usage(id, at).await
    }

    async fn record_success(&self, id: &LearningId) -> Result<()> {
        self.inner.record_success(id).await
    }

    async fn record_failure(&self, id: &LearningId, step: f64, clamp: bool) -> Result<()> {
        self.inner.record_failure(id, step, clamp).await
    }

    async fn count_by_type(&self) -> Result<BTreeMap<TaskType, usize>> {
        self.inner.count_by_type().await
    }
}
