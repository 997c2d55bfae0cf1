//! Recurring garden tasks for Tendril.
//!
//! This crate provides:
//! - The recurrence engine that derives the next occurrence of a completed task
//! - A task service for creating, completing and cancelling tasks
//! - The daily scanner that turns due and overdue tasks into notification events

mod error;
pub mod recurrence;
pub mod scanner;
mod service;
pub mod store;
mod types;

pub use error::{SchedulerError, StoreError};
pub use recurrence::{Completion, on_task_completed};
pub use scanner::{CollectingSink, EventSink, OVERDUE_ALERT_THRESHOLD, ScanReport, TaskDueScanner};
pub use service::TaskService;
pub use store::{InMemoryTaskStore, TaskStore};
pub use types::{EndCondition, Frequency, NewTask, Priority, RecurrenceRule, Task, TaskStatus};
