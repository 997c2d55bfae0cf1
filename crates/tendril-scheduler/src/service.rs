//! Task lifecycle operations.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::recurrence::{Completion, on_task_completed};
use crate::store::TaskStore;
use crate::types::{EndCondition, NewTask, Task, TaskStatus};
use crate::SchedulerError;

/// Creates, completes and cancels tasks against a [`TaskStore`].
pub struct TaskService {
    store: Arc<dyn TaskStore>,
}

impl TaskService {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Validate and persist the first task of a (possibly recurring) chain.
    #[tracing::instrument(skip(self, new), fields(owner = %new.owner, due = %new.due_date))]
    pub async fn create_task(&self, new: NewTask) -> Result<Task, SchedulerError> {
        if new.title.trim().is_empty() {
            return Err(SchedulerError::Validation("title must not be empty".to_string()));
        }
        if let Some(rule) = &new.recurrence {
            rule.validate()?;
            if let EndCondition::EndDate(end) = rule.end
                && end < new.due_date
            {
                return Err(SchedulerError::Validation(format!(
                    "end date {} is before the first due date {}",
                    end, new.due_date
                )));
            }
        }

        let task = Task {
            id: Uuid::new_v4().to_string(),
            owner: new.owner,
            title: new.title,
            due_date: new.due_date,
            priority: new.priority,
            status: TaskStatus::Pending,
            recurrence: new.recurrence,
            parent_task_id: None,
            occurrence: 1,
            crop_id: new.crop_id,
            plot_id: new.plot_id,
            created_at: Utc::now(),
            completed_at: None,
        };

        self.store.save(task.clone()).await?;
        info!(task_id = %task.id, recurring = task.recurrence.is_some(), "created task");
        Ok(task)
    }

    /// Complete a pending task and persist its next occurrence, if any.
    ///
    /// Nothing is written if the recurrence rule is malformed.
    #[tracing::instrument(skip(self))]
    pub async fn complete_task(
        &self,
        id: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<Completion, SchedulerError> {
        let task = self.get_task(id).await?;
        let completion = on_task_completed(&task, completed_at)?;

        self.store
            .save_completion(completion.completed.clone(), completion.next.clone())
            .await?;

        match &completion.next {
            Some(next) => info!(
                task_id = %id,
                next_id = %next.id,
                next_due = %next.due_date,
                occurrence = next.occurrence,
                "completed task, scheduled next occurrence"
            ),
            None => info!(task_id = %id, "completed task"),
        }
        Ok(completion)
    }

    /// Cancel a pending task. No further occurrence is generated.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_task(&self, id: &str) -> Result<Task, SchedulerError> {
        let task = self.get_task(id).await?;
        if task.status != TaskStatus::Pending {
            return Err(SchedulerError::InvalidState {
                id: task.id,
                status: task.status,
            });
        }

        let cancelled = Task {
            status: TaskStatus::Cancelled,
            ..task
        };
        self.store.save(cancelled.clone()).await?;
        info!(task_id = %id, "cancelled task");
        Ok(cancelled)
    }

    pub async fn get_task(&self, id: &str) -> Result<Task, SchedulerError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| SchedulerError::TaskNotFound(id.to_string()))
    }
}
