//! Task processing engine.
//!
//! The [`Engine`] owns the stores, the handler registry and the thresholds,
//! and exposes every lifecycle operation:
//!
//! ```text
//! create_task ──> process_task ──┬──> ai_completed
//!                     ▲          └──> human_needed / ai_failed
//!                     │                      │
//!               retry_ai_task <──────────────┤
//!                                            ▼
//!   escalate_to_human ──────────> human_processing
//!                                            │
//!                              complete_human_task ──> learning ──> human_completed
//!                                                          │
//!                                                     new Learning
//! ```
//!
//! Every write is a conditional write keyed on the version the engine last
//! read or wrote, so two callers racing on one task cannot both pass a
//! status guard: the slower one gets a conflict and nothing it computed is
//! stored.

pub mod resolver;
pub mod retry;
pub mod stats;

pub use resolver::Resolution;
pub use retry::{SweepReport, SweptTask};
pub use stats::TaskStats;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::FlywheelConfig;
use crate::error::{FlywheelError, Result};
use crate::handler::{HandlerOutcome, HandlerRegistry, TaskHandler};
use crate::learning::{Learning, LearningContext, LearningId, LearningQuery, LearningSynthesizer};
use crate::store::{LearningStore, MemoryStore, TaskFilter, TaskOrder, TaskStore};
use crate::task::{
    AiAttemptOutcome, AiAttemptUpdate, Assignment, HumanFallbackUpdate, LearningData, Priority,
    Task, TaskId, TaskStatus, TaskType, TaskUpdate,
};

/// Reason recorded when an operator escalates without giving one.
pub const DEFAULT_ESCALATION_REASON: &str = "Manual escalation";

/// Parameters for [`Engine::create_task`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub task_type: TaskType,
    pub project_id: String,
    pub input: Value,
    pub priority: Option<Priority>,
    pub max_retries: Option<u32>,
    /// Run `process_task` right after creation.
    pub auto_process: bool,
}

impl NewTask {
    #[must_use]
    pub fn new(task_type: TaskType, project_id: impl Into<String>, input: Value) -> Self {
        Self {
            task_type,
            project_id: project_id.into(),
            input,
            priority: None,
            max_retries: None,
            auto_process: false,
        }
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    #[must_use]
    pub fn auto_process(mut self, auto_process: bool) -> Self {
        self.auto_process = auto_process;
        self
    }
}

/// A human's resolution of a task.
#[derive(Debug, Clone, PartialEq)]
pub struct HumanCompletion {
    pub action: String,
    pub output: Option<Value>,
    pub notes: Option<String>,
}

/// Result of an automated attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub task: Task,
    /// Confidence recorded on the attempt (0 on handler failure).
    pub confidence: f64,
}

/// Result of a human completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOutcome {
    pub task: Task,
    /// `None` when learning synthesis failed.
    pub learning_id: Option<LearningId>,
}

/// Lifecycle engine over a task store and a learning store.
pub struct Engine {
    tasks: Arc<dyn TaskStore>,
    learnings: Arc<dyn LearningStore>,
    handlers: HandlerRegistry,
    config: FlywheelConfig,
    synthesizer: LearningSynthesizer,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("handlers", &self.handlers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Build an engine.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` fails validation.
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        learnings: Arc<dyn LearningStore>,
        handlers: HandlerRegistry,
        config: FlywheelConfig,
    ) -> Result<Self> {
        config.validate()?;
        let synthesizer = LearningSynthesizer::new(config.learning_seed_confidence);
        Ok(Self {
            tasks,
            learnings,
            handlers,
            config,
            synthesizer,
        })
    }

    /// Engine over a fresh [`MemoryStore`] holding both collections.
    pub fn in_memory(handlers: HandlerRegistry, config: FlywheelConfig) -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        Self::new(store.clone(), store, handlers, config)
    }

    #[must_use]
    pub fn config(&self) -> &FlywheelConfig {
        &self.config
    }

    #[must_use]
    pub fn task_store(&self) -> &Arc<dyn TaskStore> {
        &self.tasks
    }

    #[must_use]
    pub fn learning_store(&self) -> &Arc<dyn LearningStore> {
        &self.learnings
    }

    /// Fetch one task.
    pub async fn get_task(&self, id: &TaskId) -> Result<Task> {
        self.tasks.get(id).await
    }

    /// Learnings matching a task type and optional context, best first.
    pub async fn query_learnings(
        &self,
        task_type: TaskType,
        context: Option<&LearningContext>,
    ) -> Result<Vec<Learning>> {
        let query = LearningQuery::for_task(task_type, context, self.config.learning_match_limit);
        debug!(
            task_type = %task_type,
            filter = ?query.filter.as_ref().map(|f| f.key.as_str()),
            "Querying learnings"
        );
        self.learnings.query(&query).await
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Create a `pending` task, optionally processing it immediately.
    ///
    /// # Errors
    ///
    /// Validation error for an empty project id or a null input.
    pub async fn create_task(&self, new: NewTask) -> Result<Task> {
        let project_id = new.project_id.trim();
        if project_id.is_empty() {
            return Err(FlywheelError::invalid_field("projectId", "is required"));
        }
        if new.input.is_null() {
            return Err(FlywheelError::invalid_field("input", "is required"));
        }

        let priority = match new.priority {
            Some(p) => p,
            None => Priority::new(self.config.default_priority)?,
        };
        let max_retries = new.max_retries.unwrap_or(self.config.default_max_retries);

        let task = Task::new(
            new.task_type,
            project_id,
            new.input,
            priority,
            max_retries,
            Utc::now(),
        );
        let id = self.tasks.create(task).await?;
        info!(task_id = %id, task_type = %new.task_type, %priority, "Task created");

        if new.auto_process {
            return self.process_task(&id).await.map(|outcome| outcome.task);
        }
        self.tasks.get(&id).await
    }

    // ========================================================================
    // Automated processing
    // ========================================================================

    /// Run one automated attempt.
    ///
    /// Legal only from `pending` or `ai_failed`. Handler failures are
    /// recorded on the task, not returned.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the task is in any other status (nothing written)
    /// - `Conflict` if another caller claimed or changed the task first
    pub async fn process_task(&self, id: &TaskId) -> Result<ProcessOutcome> {
        let task = self.tasks.get(id).await?;
        task.ensure_status("process", &TaskStatus::PROCESSABLE)?;

        let claimed = self
            .tasks
            .update(
                id,
                task.version,
                TaskUpdate::status(TaskStatus::AiProcessing).with_ai_attempt(
                    AiAttemptUpdate::Begin {
                        started_at: Utc::now(),
                    },
                ),
            )
            .await?;
        info!(task_id = %id, task_type = %claimed.task_type, attempt = claimed.retry_count + 1, "AI processing started");

        let learnings = self
            .query_learnings(claimed.task_type, claimed.context().as_ref())
            .await?;
        let applied = resolver::high_confidence_learning(&learnings, self.config.auto_apply_threshold);
        if let Some(learning) = applied {
            self.learnings
                .increment_usage(&learning.id, Utc::now())
                .await?;
            debug!(
                task_id = %id,
                learning_id = %learning.id,
                confidence = learning.confidence,
                "Applying high-confidence learning"
            );
        }
        let learnings_applied: Vec<LearningId> = applied.map(|l| l.id.clone()).into_iter().collect();

        let handler = self.handlers.get(claimed.task_type);
        match self.invoke(&**handler, &claimed, &learnings).await {
            Ok(outcome) => {
                let resolution = resolver::resolve(
                    outcome.sanitized_confidence(),
                    applied.map(|l| l.confidence),
                    self.config.success_threshold,
                );
                let status = if resolution.succeeded {
                    TaskStatus::AiCompleted
                } else {
                    TaskStatus::HumanNeeded
                };
                let mut update = TaskUpdate::status(status).with_ai_attempt(
                    AiAttemptUpdate::Finish(AiAttemptOutcome {
                        completed_at: Utc::now(),
                        result: outcome.result.clone(),
                        confidence: resolution.confidence,
                        error: outcome.error,
                        learnings_applied,
                    }),
                );
                if resolution.succeeded {
                    update = update.with_output(outcome.result);
                }
                let written = self.tasks.update(id, claimed.version, update).await?;

                if resolution.succeeded {
                    if let Some(learning) = applied {
                        self.learnings.record_success(&learning.id).await?;
                    }
                }
                info!(
                    task_id = %id,
                    status = %written.status,
                    confidence = resolution.confidence,
                    boosted = resolution.boosted_by_learning,
                    "AI processing finished"
                );
                Ok(ProcessOutcome {
                    task: written,
                    confidence: resolution.confidence,
                })
            }
            Err(message) => {
                let retry_count = claimed.retry_count + 1;
                let status = if retry_count >= claimed.max_retries {
                    TaskStatus::HumanNeeded
                } else {
                    TaskStatus::AiFailed
                };
                warn!(
                    task_id = %id,
                    handler = handler.name(),
                    retry_count,
                    max_retries = claimed.max_retries,
                    next = %status,
                    "Handler failed: {}",
                    message
                );
                let update = TaskUpdate::status(status)
                    .with_retry_count(retry_count)
                    .with_ai_attempt(AiAttemptUpdate::Finish(AiAttemptOutcome {
                        completed_at: Utc::now(),
                        result: None,
                        confidence: 0.0,
                        error: Some(message),
                        learnings_applied,
                    }));
                let written = self.tasks.update(id, claimed.version, update).await?;

                if let Some(learning) = applied {
                    self.learnings
                        .record_failure(
                            &learning.id,
                            self.config.decay_step,
                            self.config.clamp_learning_confidence,
                        )
                        .await?;
                }
                Ok(ProcessOutcome {
                    task: written,
                    confidence: 0.0,
                })
            }
        }
    }

    /// Call the handler, turning errors, panics and timeouts into a message.
    async fn invoke(
        &self,
        handler: &dyn TaskHandler,
        task: &Task,
        learnings: &[Learning],
    ) -> std::result::Result<HandlerOutcome, String> {
        let call = AssertUnwindSafe(handler.handle(&task.input, learnings)).catch_unwind();
        let joined = match self.config.handler_timeout() {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(joined) => joined,
                Err(_) => return Err(format!("handler timed out after {}s", limit.as_secs())),
            },
            None => call.await,
        };
        match joined {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(format!("{e:#}")),
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(format!("handler panicked: {detail}"))
            }
        }
    }

    // ========================================================================
    // Human path
    // ========================================================================

    /// Route a task to a human, from any status.
    ///
    /// With `assigned_to` the task moves to `human_processing`, otherwise to
    /// `human_needed`.
    ///
    /// # Errors
    ///
    /// - `TaskNotFound` if the task does not exist
    /// - Validation error for a blank assignee
    /// - `Conflict` if the task changed between read and write
    pub async fn escalate_to_human(
        &self,
        id: &TaskId,
        reason: Option<String>,
        assigned_to: Option<String>,
        actor: &str,
    ) -> Result<Task> {
        let assigned_to = match assigned_to {
            Some(a) if a.trim().is_empty() => {
                return Err(FlywheelError::invalid_field("assignedTo", "must not be blank"))
            }
            other => other,
        };
        let task = self.tasks.get(id).await?;
        let now = Utc::now();
        let status = if assigned_to.is_some() {
            TaskStatus::HumanProcessing
        } else {
            TaskStatus::HumanNeeded
        };
        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ESCALATION_REASON.to_string());

        let update = TaskUpdate::status(status).with_human_fallback(HumanFallbackUpdate::Escalate {
            reason,
            escalated_by: actor.to_string(),
            escalated_at: now,
            assignment: assigned_to.map(|assigned_to| Assignment {
                assigned_to,
                assigned_at: now,
            }),
        });
        let written = self.tasks.update(id, task.version, update).await?;
        info!(
            task_id = %id,
            from = %task.status,
            to = %written.status,
            assigned_to = ?written.assigned_to(),
            "Task escalated to human"
        );
        Ok(written)
    }

    /// Record a human resolution and synthesize a learning from it.
    ///
    /// A failed synthesis is logged and the task still completes with no
    /// learning id.
    ///
    /// # Errors
    ///
    /// - Validation error for an empty action
    /// - `InvalidState` unless the task is `human_needed` or `human_processing`
    /// - `LearningDataAlreadySet` if a human already completed the task once
    /// - `Conflict` if the task changed concurrently
    pub async fn complete_human_task(
        &self,
        id: &TaskId,
        completion: HumanCompletion,
        actor: &str,
    ) -> Result<CompletionOutcome> {
        if completion.action.trim().is_empty() {
            return Err(FlywheelError::invalid_field("action", "is required"));
        }
        let task = self.tasks.get(id).await?;
        task.ensure_status("complete", &TaskStatus::AWAITING_HUMAN)?;
        if task.learning_data.is_some() {
            return Err(FlywheelError::LearningDataAlreadySet { id: id.clone() });
        }

        let recorded = self
            .tasks
            .update(
                id,
                task.version,
                TaskUpdate::status(TaskStatus::Learning).with_human_fallback(
                    HumanFallbackUpdate::Complete {
                        completed_by: actor.to_string(),
                        completed_at: Utc::now(),
                        action: completion.action,
                        notes: completion.notes,
                        output: completion.output.clone(),
                    },
                ),
            )
            .await?;

        let learning_id = match self
            .learnings
            .create(self.synthesizer.synthesize(&recorded))
            .await
        {
            Ok(learning_id) => {
                info!(task_id = %id, learning_id = %learning_id, "Learning synthesized");
                Some(learning_id)
            }
            Err(e) => {
                warn!(task_id = %id, "Learning synthesis failed, completing without it: {}", e);
                None
            }
        };

        let data = LearningData {
            learning_id: learning_id.clone(),
            ai_input: recorded.input.clone(),
            human_output: completion.output,
            delta: LearningSynthesizer::delta(&recorded),
            trainable: true,
        };
        let written = self
            .tasks
            .update(
                id,
                recorded.version,
                TaskUpdate::status(TaskStatus::HumanCompleted).with_learning_data(data),
            )
            .await?;
        info!(task_id = %id, "Task completed by human");

        Ok(CompletionOutcome {
            task: written,
            learning_id,
        })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Tasks matching `filter`, most urgent first.
    pub async fn get_task_queue(&self, filter: &TaskFilter, limit: Option<usize>) -> Result<Vec<Task>> {
        let limit = self.config.queue_limit(limit);
        self.tasks.query(filter, TaskOrder::Priority, limit).await
    }

    /// Aggregate statistics, optionally scoped to a project and a start time.
    pub async fn get_task_stats(
        &self,
        project_id: Option<String>,
        since: Option<DateTime<Utc>>,
    ) -> Result<TaskStats> {
        let filter = TaskFilter {
            project_id,
            created_since: since,
            ..TaskFilter::default()
        };
        let tasks = self
            .tasks
            .query(&filter, TaskOrder::CreatedDesc, usize::MAX)
            .await?;
        let coverage = self.learnings.count_by_type().await?;
        Ok(TaskStats::from_tasks(&tasks, coverage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::learning::{LearningDelta, NewLearning};
    use crate::testing::{FailingLearningStore, MockHandler};
    use serde_json::json;

    fn engine_with(task_type: TaskType, handler: MockHandler) -> (Engine, Arc<MockHandler>) {
        let handler = Arc::new(handler);
        let registry = HandlerRegistry::builder()
            .register(task_type, handler.clone())
            .fill_placeholders()
            .build()
            .unwrap();
        (
            Engine::in_memory(registry, FlywheelConfig::default()).unwrap(),
            handler,
        )
    }

    fn permit_input() -> Value {
        json!({"context": {"jurisdiction": "Austin", "state": "TX"}})
    }

    async fn seed_learning(engine: &Engine, jurisdiction: &str, confidence: f64) -> LearningId {
        engine
            .learning_store()
            .create(NewLearning {
                task_type: TaskType::PermitSubmit,
                context: LearningContext::from(json!({"jurisdiction": jurisdiction})),
                pattern: format!("file in {jurisdiction}"),
                human_action: "Filed manually".into(),
                human_input: None,
                ai_attempted_output: None,
                delta: LearningDelta {
                    ai_confidence: Some(0.0),
                    human_provided: true,
                },
                confidence,
                created_by: "system".into(),
                source_task_id: None,
            })
            .await
            .unwrap()
    }

    async fn pending(engine: &Engine, max_retries: u32) -> TaskId {
        engine
            .create_task(
                NewTask::new(TaskType::PermitSubmit, "P1", permit_input())
                    .with_max_retries(max_retries),
            )
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_create_without_auto_process_stays_pending() {
        let (engine, handler) = engine_with(TaskType::PermitSubmit, MockHandler::confident(0.9));
        let input = json!({"context": {"state": "TX"}});
        let task = engine
            .create_task(NewTask::new(TaskType::PermitSubmit, "P1", input.clone()))
            .await
            .unwrap();
        let loaded = engine.get_task(&task.id).await.unwrap();
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.input, input);
        assert_eq!(loaded.max_retries, 3);
        assert_eq!(loaded.priority, Priority::NORMAL);
        assert_eq!(handler.invocations(), 0);
    }

    #[tokio::test]
    async fn test_create_validates_project_and_input() {
        let (engine, _) = engine_with(TaskType::PermitSubmit, MockHandler::confident(0.9));
        let err = engine
            .create_task(NewTask::new(TaskType::PermitSubmit, "  ", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);

        let err = engine
            .create_task(NewTask::new(TaskType::PermitSubmit, "P1", Value::Null))
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[tokio::test]
    async fn test_placeholder_auto_process_escalates() {
        let engine = Engine::in_memory(HandlerRegistry::placeholders(), FlywheelConfig::default())
            .unwrap();
        let task = engine
            .create_task(NewTask::new(TaskType::CadGenerate, "P1", json!({})).auto_process(true))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::HumanNeeded);
        assert_eq!(task.ai_attempt.as_ref().unwrap().confidence, 0.0);
        assert!(task.output.is_none());
    }

    #[tokio::test]
    async fn test_confident_handler_completes() {
        let (engine, _) = engine_with(
            TaskType::PermitSubmit,
            MockHandler::confident(0.7).with_result(json!({"permit": "A-1"})),
        );
        let id = pending(&engine, 3).await;
        let outcome = engine.process_task(&id).await.unwrap();
        assert_eq!(outcome.task.status, TaskStatus::AiCompleted);
        assert_eq!(outcome.task.output, Some(json!({"permit": "A-1"})));
        assert_eq!(outcome.confidence, 0.7);
        let attempt = outcome.task.ai_attempt.unwrap();
        assert!(attempt.completed_at.is_some());
        assert!(attempt.learnings_applied.is_empty());
    }

    #[tokio::test]
    async fn test_low_confidence_escalates_without_output() {
        let (engine, _) = engine_with(
            TaskType::PermitSubmit,
            MockHandler::confident(0.65).with_result(json!({"draft": true})),
        );
        let id = pending(&engine, 3).await;
        let outcome = engine.process_task(&id).await.unwrap();
        assert_eq!(outcome.task.status, TaskStatus::HumanNeeded);
        assert!(outcome.task.output.is_none());
        assert_eq!(
            outcome.task.ai_attempt.unwrap().result,
            Some(json!({"draft": true}))
        );
    }

    #[tokio::test]
    async fn test_process_rejected_outside_guard_without_mutation() {
        let (engine, handler) = engine_with(TaskType::PermitSubmit, MockHandler::confident(0.9));
        let id = pending(&engine, 3).await;
        engine.process_task(&id).await.unwrap();
        let before = engine.get_task(&id).await.unwrap();
        assert_eq!(before.status, TaskStatus::AiCompleted);

        let err = engine.process_task(&id).await.unwrap_err();
        assert!(matches!(err, FlywheelError::InvalidState { .. }));
        let after = engine.get_task(&id).await.unwrap();
        assert_eq!(after.updated_at, before.updated_at);
        assert_eq!(after.version, before.version);
        assert_eq!(handler.invocations(), 1);
    }

    #[tokio::test]
    async fn test_high_confidence_learning_lifts_and_counts() {
        let (engine, handler) = engine_with(TaskType::PermitSubmit, MockHandler::confident(0.0));
        let strong = seed_learning(&engine, "Austin", 0.85).await;
        let weak = seed_learning(&engine, "Austin", 0.6).await;

        let id = pending(&engine, 3).await;
        let outcome = engine.process_task(&id).await.unwrap();
        assert_eq!(outcome.task.status, TaskStatus::AiCompleted);
        assert_eq!(outcome.confidence, 0.85);
        assert_eq!(
            outcome.task.ai_attempt.unwrap().learnings_applied,
            vec![strong.clone()]
        );
        assert_eq!(handler.last_learning_count(), 2);

        let strong = engine.learning_store().get(&strong).await.unwrap();
        assert_eq!(strong.usage_count, 1);
        assert_eq!(strong.success_count, 1);
        let weak = engine.learning_store().get(&weak).await.unwrap();
        assert_eq!(weak.usage_count, 0);
    }

    #[tokio::test]
    async fn test_learning_usage_counted_even_when_handler_fails() {
        let (engine, _) = engine_with(TaskType::PermitSubmit, MockHandler::failing("portal down"));
        let learning = seed_learning(&engine, "Austin", 0.85).await;
        let id = pending(&engine, 3).await;

        let outcome = engine.process_task(&id).await.unwrap();
        assert_eq!(outcome.task.status, TaskStatus::AiFailed);

        let learning = engine.learning_store().get(&learning).await.unwrap();
        assert_eq!(learning.usage_count, 1);
        assert_eq!(learning.success_count, 0);
        assert_eq!(learning.failure_count, 1);
        assert!((learning.confidence - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_learning_from_other_jurisdiction_is_ignored() {
        let (engine, _) = engine_with(TaskType::PermitSubmit, MockHandler::confident(0.0));
        seed_learning(&engine, "Dallas", 0.95).await;
        let id = pending(&engine, 3).await;
        let outcome = engine.process_task(&id).await.unwrap();
        assert_eq!(outcome.task.status, TaskStatus::HumanNeeded);
    }

    #[tokio::test]
    async fn test_handler_failures_bounded_by_max_retries() {
        let (engine, handler) = engine_with(TaskType::PermitSubmit, MockHandler::failing("boom"));
        let id = pending(&engine, 3).await;

        let first = engine.process_task(&id).await.unwrap();
        assert_eq!(first.task.status, TaskStatus::AiFailed);
        assert_eq!(first.task.retry_count, 1);
        assert_eq!(first.confidence, 0.0);
        assert!(first
            .task
            .ai_attempt
            .as_ref()
            .unwrap()
            .error
            .as_deref()
            .unwrap()
            .contains("boom"));

        let second = engine.process_task(&id).await.unwrap();
        assert_eq!(second.task.status, TaskStatus::AiFailed);
        assert_eq!(second.task.retry_count, 2);

        let third = engine.process_task(&id).await.unwrap();
        assert_eq!(third.task.status, TaskStatus::HumanNeeded);
        assert_eq!(third.task.retry_count, 3);
        assert_eq!(handler.invocations(), 3);

        let err = engine.process_task(&id).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Precondition);
    }

    #[tokio::test]
    async fn test_handler_panic_is_a_handler_failure() {
        let (engine, _) = engine_with(TaskType::PermitSubmit, MockHandler::panicking("bad state"));
        let id = pending(&engine, 3).await;
        let outcome = engine.process_task(&id).await.unwrap();
        assert_eq!(outcome.task.status, TaskStatus::AiFailed);
        let error = outcome.task.ai_attempt.unwrap().error.unwrap();
        assert!(error.contains("panicked"));
        assert!(error.contains("bad state"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_timeout_is_a_handler_failure() {
        let handler = Arc::new(
            MockHandler::confident(0.9).with_delay(std::time::Duration::from_secs(600)),
        );
        let registry = HandlerRegistry::builder()
            .register(TaskType::PermitSubmit, handler)
            .fill_placeholders()
            .build()
            .unwrap();
        let config = FlywheelConfig {
            handler_timeout_secs: 5,
            ..FlywheelConfig::default()
        };
        let engine = Engine::in_memory(registry, config).unwrap();
        let id = pending(&engine, 3).await;
        let outcome = engine.process_task(&id).await.unwrap();
        assert_eq!(outcome.task.status, TaskStatus::AiFailed);
        assert!(outcome
            .task
            .ai_attempt
            .unwrap()
            .error
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn test_concurrent_process_invokes_handler_once() {
        let (engine, handler) = engine_with(
            TaskType::PermitSubmit,
            MockHandler::confident(0.9).with_delay(std::time::Duration::from_millis(50)),
        );
        let id = pending(&engine, 3).await;

        let (a, b) = tokio::join!(engine.process_task(&id), engine.process_task(&id));
        let results = [a, b];
        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(succeeded, 1);
        let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
        assert!(matches!(
            loser.category(),
            ErrorCategory::Conflict | ErrorCategory::Precondition
        ));
        assert_eq!(handler.invocations(), 1);
        assert_eq!(
            engine.get_task(&id).await.unwrap().status,
            TaskStatus::AiCompleted
        );
    }

    #[tokio::test]
    async fn test_escalate_from_any_status() {
        let (engine, _) = engine_with(TaskType::PermitSubmit, MockHandler::confident(0.9));
        let id = pending(&engine, 3).await;
        engine.process_task(&id).await.unwrap();

        let task = engine
            .escalate_to_human(&id, Some("customer dispute".into()), None, "ops@example.com")
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::HumanNeeded);
        let fallback = task.human_fallback.unwrap();
        assert_eq!(fallback.reason.as_deref(), Some("customer dispute"));
        assert_eq!(fallback.escalated_by.as_deref(), Some("ops@example.com"));
        assert!(fallback.escalated_at.is_some());
        assert!(fallback.assigned_to.is_none());
    }

    #[tokio::test]
    async fn test_escalate_with_assignee_claims_task() {
        let (engine, _) = engine_with(TaskType::PermitSubmit, MockHandler::confident(0.0));
        let id = pending(&engine, 3).await;
        let task = engine
            .escalate_to_human(&id, None, Some("dana".into()), "ops")
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::HumanProcessing);
        let fallback = task.human_fallback.unwrap();
        assert_eq!(fallback.reason.as_deref(), Some(DEFAULT_ESCALATION_REASON));
        assert_eq!(fallback.assigned_to.as_deref(), Some("dana"));
        assert!(fallback.assigned_at.is_some());
    }

    #[tokio::test]
    async fn test_escalate_missing_task() {
        let (engine, _) = engine_with(TaskType::PermitSubmit, MockHandler::confident(0.0));
        let err = engine
            .escalate_to_human(&TaskId::from("missing"), None, None, "ops")
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::NotFound);
    }

    #[tokio::test]
    async fn test_complete_human_task_synthesizes_learning() {
        let (engine, _) = engine_with(TaskType::PermitSubmit, MockHandler::confident(0.3));
        let id = pending(&engine, 3).await;
        engine.process_task(&id).await.unwrap();

        let outcome = engine
            .complete_human_task(
                &id,
                HumanCompletion {
                    action: "Filed manually".into(),
                    output: Some(json!({"permitNumber": "A-1"})),
                    notes: Some("portal needed a PE stamp".into()),
                },
                "dana",
            )
            .await
            .unwrap();

        assert_eq!(outcome.task.status, TaskStatus::HumanCompleted);
        assert_eq!(outcome.task.output, Some(json!({"permitNumber": "A-1"})));
        let data = outcome.task.learning_data.as_ref().unwrap();
        let learning_id = data.learning_id.clone().unwrap();
        assert_eq!(Some(&learning_id), outcome.learning_id.as_ref());
        assert_eq!(data.ai_input, permit_input());
        assert!(data.trainable);
        assert_eq!(data.delta.ai_confidence, Some(0.3));

        let fallback = outcome.task.human_fallback.as_ref().unwrap();
        assert_eq!(fallback.completed_by.as_deref(), Some("dana"));
        assert_eq!(fallback.action.as_deref(), Some("Filed manually"));

        let learning = engine.learning_store().get(&learning_id).await.unwrap();
        assert_eq!(learning.confidence, 0.5);
        assert_eq!(learning.usage_count, 0);
        assert_eq!(learning.created_by, "system");
        assert_eq!(learning.source_task_id.as_ref(), Some(&id));
    }

    #[tokio::test]
    async fn test_complete_rejected_from_pending() {
        let (engine, _) = engine_with(TaskType::PermitSubmit, MockHandler::confident(0.3));
        let id = pending(&engine, 3).await;
        let err = engine
            .complete_human_task(
                &id,
                HumanCompletion {
                    action: "Filed".into(),
                    output: None,
                    notes: None,
                },
                "dana",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, FlywheelError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_complete_requires_action() {
        let (engine, _) = engine_with(TaskType::PermitSubmit, MockHandler::confident(0.3));
        let id = pending(&engine, 3).await;
        let err = engine
            .complete_human_task(
                &id,
                HumanCompletion {
                    action: " ".into(),
                    output: None,
                    notes: None,
                },
                "dana",
            )
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[tokio::test]
    async fn test_synthesis_failure_does_not_block_completion() {
        let store = Arc::new(MemoryStore::new());
        let learnings = Arc::new(FailingLearningStore::new(store.clone()));
        let engine = Engine::new(
            store,
            learnings,
            HandlerRegistry::placeholders(),
            FlywheelConfig::default(),
        )
        .unwrap();
        let task = engine
            .create_task(NewTask::new(TaskType::SurveyProcess, "P1", json!({})).auto_process(true))
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::HumanNeeded);

        let outcome = engine
            .complete_human_task(
                &task.id,
                HumanCompletion {
                    action: "Processed survey by hand".into(),
                    output: None,
                    notes: None,
                },
                "dana",
            )
            .await
            .unwrap();
        assert_eq!(outcome.task.status, TaskStatus::HumanCompleted);
        assert!(outcome.learning_id.is_none());
        assert!(outcome.task.learning_data.unwrap().learning_id.is_none());
    }

    #[tokio::test]
    async fn test_second_completion_after_reescalation_is_rejected_unchanged() {
        let engine = Engine::in_memory(HandlerRegistry::placeholders(), FlywheelConfig::default())
            .unwrap();
        let task = engine
            .create_task(NewTask::new(TaskType::PermitSubmit, "P1", permit_input()).auto_process(true))
            .await
            .unwrap();
        let completion = |action: &str| HumanCompletion {
            action: action.into(),
            output: Some(json!({"permitNumber": "A-1"})),
            notes: None,
        };
        let first = engine
            .complete_human_task(&task.id, completion("Filed manually"), "dana")
            .await
            .unwrap();

        let reopened = engine
            .escalate_to_human(&task.id, Some("customer dispute".into()), None, "ops")
            .await
            .unwrap();
        assert_eq!(reopened.status, TaskStatus::HumanNeeded);

        let err = engine
            .complete_human_task(&task.id, completion("Filed again"), "dana")
            .await
            .unwrap_err();
        assert!(matches!(err, FlywheelError::LearningDataAlreadySet { .. }));
        assert_eq!(err.category(), ErrorCategory::Precondition);

        let after = engine.get_task(&task.id).await.unwrap();
        assert_eq!(after, reopened);
        assert_eq!(after.learning_data, first.task.learning_data);
        let counts = engine.learning_store().count_by_type().await.unwrap();
        assert_eq!(counts.get(&TaskType::PermitSubmit), Some(&1));
    }

    #[tokio::test]
    async fn test_human_completion_without_output_replaces_ai_result() {
        let (engine, _) = engine_with(
            TaskType::PermitSubmit,
            MockHandler::confident(0.9).with_result(json!({"ai": 1})),
        );
        let id = pending(&engine, 3).await;
        let processed = engine.process_task(&id).await.unwrap();
        assert_eq!(processed.task.output, Some(json!({"ai": 1})));

        engine
            .escalate_to_human(&id, Some("wrong permit class".into()), None, "ops")
            .await
            .unwrap();
        let outcome = engine
            .complete_human_task(
                &id,
                HumanCompletion {
                    action: "Withdrew the filing".into(),
                    output: None,
                    notes: None,
                },
                "dana",
            )
            .await
            .unwrap();

        assert_eq!(outcome.task.output, None);
        assert_eq!(outcome.task.human_fallback.as_ref().unwrap().output, None);
        let data = outcome.task.learning_data.as_ref().unwrap();
        assert_eq!(data.human_output, None);

        let learning = engine
            .learning_store()
            .get(outcome.learning_id.as_ref().unwrap())
            .await
            .unwrap();
        assert_eq!(learning.human_input, None);
        assert_eq!(learning.ai_attempted_output, Some(json!({"ai": 1})));
    }

    #[tokio::test]
    async fn test_queue_filters_and_orders() {
        let engine = Engine::in_memory(HandlerRegistry::placeholders(), FlywheelConfig::default())
            .unwrap();
        for (t, p) in [
            (TaskType::PermitCheck, 4),
            (TaskType::PermitCheck, 1),
            (TaskType::CadGenerate, 2),
        ] {
            engine
                .create_task(NewTask::new(t, "P1", json!({})).with_priority(Priority::new(p).unwrap()))
                .await
                .unwrap();
        }
        let filter = TaskFilter {
            task_type: Some(TaskType::PermitCheck),
            ..TaskFilter::default()
        };
        let queue = engine.get_task_queue(&filter, None).await.unwrap();
        let priorities: Vec<u8> = queue.iter().map(|t| t.priority.get()).collect();
        assert_eq!(priorities, vec![1, 4]);

        let capped = engine
            .get_task_queue(&TaskFilter::default(), Some(1))
            .await
            .unwrap();
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].priority, Priority::CRITICAL);
    }

    #[tokio::test]
    async fn test_stats_scoped_to_project() {
        let engine = Engine::in_memory(HandlerRegistry::placeholders(), FlywheelConfig::default())
            .unwrap();
        engine
            .create_task(NewTask::new(TaskType::PermitCheck, "P1", json!({})).auto_process(true))
            .await
            .unwrap();
        engine
            .create_task(NewTask::new(TaskType::PermitCheck, "P2", json!({})))
            .await
            .unwrap();

        let stats = engine.get_task_stats(Some("P1".into()), None).await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.ai_attempted, 1);
        assert_eq!(stats.ai_success_rate, 0.0);

        let all = engine.get_task_stats(None, None).await.unwrap();
        assert_eq!(all.total, 2);
    }
}
