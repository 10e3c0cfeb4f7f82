//! Assertions on task state with readable failure messages.

use crate::task::{Task, TaskStatus};

/// Assert that a task is in `expected` status.
///
/// # Panics
///
/// Panics with the task's id, status and last attempt if it is not.
pub fn assert_status(task: &Task, expected: TaskStatus) {
    assert_eq!(
        task.status, expected,
        "task {} expected {}, was {} (attempt: {:?})",
        task.id, expected, task.status, task.ai_attempt
    );
}

/// Assert that a task finished through the human path with a linked learning.
///
/// # Panics
///
/// Panics if the task is not `human_completed` or has no learning id.
pub fn assert_learning_linked(task: &Task) {
    assert_status(task, TaskStatus::HumanCompleted);
    let linked = task
        .learning_data
        .as_ref()
        .and_then(|d| d.learning_id.as_ref());
    assert!(
        linked.is_some(),
        "task {} completed without a learning: {:?}",
        task.id,
        task.learning_data
    );
}

/// Assert the retry budget invariant for a task at rest.
///
/// # Panics
///
/// Panics if an `ai_failed` task has used up (or overrun) its retries.
pub fn assert_retry_budget(task: &Task) {
    if task.status == TaskStatus::AiFailed {
        assert!(
            task.retry_count < task.max_retries,
            "task {} is ai_failed with retry_count {} >= max_retries {}",
            task.id,
            task.retry_count,
            task.max_retries
        );
    }
    assert!(
        task.retry_count <= task.max_retries,
        "task {} overran its retry budget: {} > {}",
        task.id,
        task.retry_count,
        task.max_retries
    );
}
