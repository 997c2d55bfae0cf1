//! Task persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::types::{Task, TaskStatus};

/// Storage for tasks.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Pending tasks due exactly on `day`.
    async fn find_due_on(&self, day: NaiveDate) -> Result<Vec<Task>, StoreError>;

    /// Pending tasks due strictly before `as_of`.
    async fn find_overdue(&self, as_of: NaiveDate) -> Result<Vec<Task>, StoreError>;

    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError>;

    /// Insert or replace a task.
    async fn save(&self, task: Task) -> Result<(), StoreError>;

    /// Persist a completion and its next occurrence together.
    ///
    /// Fails with [`StoreError::Conflict`] if the stored task is no longer
    /// pending, in which case nothing is written.
    async fn save_completion(&self, completed: Task, next: Option<Task>) -> Result<(), StoreError>;
}

/// Task store held in memory.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<String, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self {
            tasks: RwLock::new(tasks.into_iter().map(|t| (t.id.clone(), t)).collect()),
        }
    }

    /// Swap in a fresh set of tasks, dropping any not present.
    pub async fn replace_all(&self, tasks: impl IntoIterator<Item = Task>) {
        *self.tasks.write().await = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
    }

    /// Every task, ordered by due date then id.
    pub async fn all(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    async fn filter(&self, pred: impl Fn(&Task) -> bool) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| pred(*t))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.id.cmp(&b.id)));
        tasks
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn find_due_on(&self, day: NaiveDate) -> Result<Vec<Task>, StoreError> {
        Ok(self.filter(|t| t.is_due_on(day)).await)
    }

    async fn find_overdue(&self, as_of: NaiveDate) -> Result<Vec<Task>, StoreError> {
        Ok(self.filter(|t| t.is_overdue(as_of)).await)
    }

    async fn get(&self, id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn save(&self, task: Task) -> Result<(), StoreError> {
        self.tasks.write().await.insert(task.id.clone(), task);
        Ok(())
    }

    async fn save_completion(&self, completed: Task, next: Option<Task>) -> Result<(), StoreError> {
        let mut tasks = self.tasks.write().await;

        match tasks.get(&completed.id) {
            Some(current) if current.status == TaskStatus::Pending => {}
            _ => return Err(StoreError::Conflict(completed.id)),
        }

        if let Some(next) = next {
            tasks.insert(next.id.clone(), next);
        }
        tasks.insert(completed.id.clone(), completed);
        Ok(())
    }
}
