//! Error types for task scheduling.

use thiserror::Error;

use crate::types::TaskStatus;

/// Errors raised by a task store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or failed mid-query.
    #[error("task store unavailable: {0}")]
    Unavailable(String),

    /// A concurrent writer changed the task first.
    #[error("conflicting update to task {0}")]
    Conflict(String),
}

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Persistence failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid task or recurrence rule.
    #[error("invalid task: {0}")]
    Validation(String),

    /// Task not found.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// The task is not in a state that allows the operation.
    #[error("task {id} is {status}, expected pending")]
    InvalidState { id: String, status: TaskStatus },

    /// Date arithmetic left the representable range.
    #[error("next occurrence of task {0} is out of range")]
    DateOverflow(String),

    /// The event sink stopped accepting events.
    #[error("event sink closed: {0}")]
    Sink(String),
}
