//! Task and recurrence types.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tendril_notify::UserId;

use crate::SchedulerError;

/// Task priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Completed,
    Cancelled,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => f.write_str("pending"),
            TaskStatus::Completed => f.write_str("completed"),
            TaskStatus::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Unit of a recurrence interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    /// Calendar months, clamped to the last day of shorter months.
    Monthly,
}

/// When a recurrence chain stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndCondition {
    /// Total number of occurrences in the chain, including the first.
    MaxOccurrences(u32),
    /// No occurrence may fall after this date.
    EndDate(NaiveDate),
}

/// How a task repeats. Copied verbatim to every generated occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
    pub end: EndCondition,
}

impl RecurrenceRule {
    pub fn new(frequency: Frequency, interval: u32, end: EndCondition) -> Self {
        Self {
            frequency,
            interval,
            end,
        }
    }

    pub fn daily(interval: u32, end: EndCondition) -> Self {
        Self::new(Frequency::Daily, interval, end)
    }

    pub fn weekly(interval: u32, end: EndCondition) -> Self {
        Self::new(Frequency::Weekly, interval, end)
    }

    pub fn monthly(interval: u32, end: EndCondition) -> Self {
        Self::new(Frequency::Monthly, interval, end)
    }

    /// Reject rules that can never produce a sensible chain.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.interval == 0 {
            return Err(SchedulerError::Validation(
                "recurrence interval must be at least 1".to_string(),
            ));
        }
        if let EndCondition::MaxOccurrences(0) = self.end {
            return Err(SchedulerError::Validation(
                "max occurrences must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A garden task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub owner: UserId,
    pub title: String,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,
    /// The task whose completion produced this one.
    #[serde(default)]
    pub parent_task_id: Option<String>,
    /// 1-based position in the recurrence chain.
    #[serde(default = "first_occurrence")]
    pub occurrence: u32,
    #[serde(default)]
    pub crop_id: Option<String>,
    #[serde(default)]
    pub plot_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

fn first_occurrence() -> u32 {
    1
}

impl Task {
    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    /// Pending and due exactly on `day`.
    pub fn is_due_on(&self, day: NaiveDate) -> bool {
        self.is_pending() && self.due_date == day
    }

    /// Pending and due strictly before `as_of`.
    pub fn is_overdue(&self, as_of: NaiveDate) -> bool {
        self.is_pending() && self.due_date < as_of
    }
}

/// Input for creating the first task of a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTask {
    pub owner: UserId,
    pub title: String,
    pub due_date: NaiveDate,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub recurrence: Option<RecurrenceRule>,
    #[serde(default)]
    pub crop_id: Option<String>,
    #[serde(default)]
    pub plot_id: Option<String>,
}

impl NewTask {
    pub fn new(owner: impl Into<UserId>, title: impl Into<String>, due_date: NaiveDate) -> Self {
        Self {
            owner: owner.into(),
            title: title.into(),
            due_date,
            priority: Priority::default(),
            recurrence: None,
            crop_id: None,
            plot_id: None,
        }
    }

    pub fn with_recurrence(mut self, rule: RecurrenceRule) -> Self {
        self.recurrence = Some(rule);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn for_crop(mut self, crop_id: impl Into<String>) -> Self {
        self.crop_id = Some(crop_id.into());
        self
    }

    pub fn in_plot(mut self, plot_id: impl Into<String>) -> Self {
        self.plot_id = Some(plot_id.into());
        self
    }
}
