//! Recurrence engine.
//!
//! Completing a recurring task produces at most one next occurrence, due
//! one interval after the completed task's due date. Missed intervals are
//! never backfilled.

use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::types::{EndCondition, Frequency, RecurrenceRule, Task, TaskStatus};
use crate::SchedulerError;

/// Result of completing a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub completed: Task,
    /// The next occurrence, if the chain continues.
    pub next: Option<Task>,
}

/// Advance `from` by one interval of `rule`. `None` on date overflow.
pub fn advance(rule: &RecurrenceRule, from: NaiveDate) -> Option<NaiveDate> {
    match rule.frequency {
        Frequency::Daily => from.checked_add_days(Days::new(u64::from(rule.interval))),
        Frequency::Weekly => from.checked_add_days(Days::new(u64::from(rule.interval) * 7)),
        Frequency::Monthly => from.checked_add_months(Months::new(rule.interval)),
    }
}

/// Mark `task` completed and derive its next occurrence.
///
/// Fails without side effects if the task is not pending, its rule is
/// malformed, or the next date cannot be represented.
pub fn on_task_completed(
    task: &Task,
    completed_at: DateTime<Utc>,
) -> Result<Completion, SchedulerError> {
    if task.status != TaskStatus::Pending {
        return Err(SchedulerError::InvalidState {
            id: task.id.clone(),
            status: task.status,
        });
    }

    let next = match &task.recurrence {
        Some(rule) => next_occurrence(task, rule, completed_at)?,
        None => None,
    };

    let completed = Task {
        status: TaskStatus::Completed,
        completed_at: Some(completed_at),
        ..task.clone()
    };

    Ok(Completion { completed, next })
}

fn next_occurrence(
    task: &Task,
    rule: &RecurrenceRule,
    created_at: DateTime<Utc>,
) -> Result<Option<Task>, SchedulerError> {
    rule.validate()?;

    if let EndCondition::MaxOccurrences(max) = rule.end
        && task.occurrence >= max
    {
        debug!(task_id = %task.id, occurrence = task.occurrence, max, "recurrence chain finished");
        return Ok(None);
    }

    let due_date =
        advance(rule, task.due_date).ok_or_else(|| SchedulerError::DateOverflow(task.id.clone()))?;

    if let EndCondition::EndDate(end) = rule.end
        && due_date > end
    {
        debug!(task_id = %task.id, %due_date, %end, "next occurrence past end date");
        return Ok(None);
    }

    let occurrence = task
        .occurrence
        .checked_add(1)
        .ok_or_else(|| SchedulerError::DateOverflow(task.id.clone()))?;

    Ok(Some(Task {
        id: Uuid::new_v4().to_string(),
        owner: task.owner.clone(),
        title: task.title.clone(),
        due_date,
        priority: task.priority,
        status: TaskStatus::Pending,
        recurrence: Some(*rule),
        parent_task_id: Some(task.id.clone()),
        occurrence,
        crop_id: task.crop_id.clone(),
        plot_id: task.plot_id.clone(),
        created_at,
        completed_at: None,
    }))
}
