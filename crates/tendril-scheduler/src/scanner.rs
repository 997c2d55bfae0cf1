//! Daily due-task scan.
//!
//! Emits a reminder for every pending task due on the as-of date and one
//! aggregated overdue alert per user with at least
//! [`OVERDUE_ALERT_THRESHOLD`] overdue tasks. Both queries finish before
//! anything is emitted, so a store failure emits nothing. Re-running a scan
//! for the same date emits the same logical events; the dedup store
//! collapses them.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use tendril_notify::{NotificationEvent, UserId};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::store::TaskStore;
use crate::types::Task;
use crate::SchedulerError;

/// Overdue tasks a user must have before an alert is sent.
pub const OVERDUE_ALERT_THRESHOLD: usize = 3;

/// Destination for events produced by a scan.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: NotificationEvent) -> Result<(), SchedulerError>;
}

#[async_trait]
impl EventSink for mpsc::Sender<NotificationEvent> {
    async fn emit(&self, event: NotificationEvent) -> Result<(), SchedulerError> {
        self.send(event)
            .await
            .map_err(|_| SchedulerError::Sink("event queue closed".to_string()))
    }
}

/// Sink that keeps every event, for one-shot runs and tests.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<NotificationEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<NotificationEvent> {
        self.events
            .lock()
            .map(|mut events| std::mem::take(&mut *events))
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn emit(&self, event: NotificationEvent) -> Result<(), SchedulerError> {
        self.events
            .lock()
            .map_err(|_| SchedulerError::Sink("collector poisoned".to_string()))?
            .push(event);
        Ok(())
    }
}

/// Summary of one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub as_of: NaiveDate,
    pub due_today: usize,
    pub overdue_tasks: usize,
    pub overdue_users: usize,
    pub alerts: usize,
    pub emitted: usize,
}

/// Finds due and overdue tasks and turns them into notification events.
pub struct TaskDueScanner {
    store: Arc<dyn TaskStore>,
}

impl TaskDueScanner {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Compute the events for `as_of` without emitting them.
    pub async fn collect(
        &self,
        as_of: NaiveDate,
    ) -> Result<(Vec<NotificationEvent>, ScanReport), SchedulerError> {
        let due = self.store.find_due_on(as_of).await?;
        let overdue = self.store.find_overdue(as_of).await?;

        let mut events: Vec<NotificationEvent> = due
            .iter()
            .map(|t| NotificationEvent::task_due_reminder(&t.owner, &t.id, &t.title, t.due_date))
            .collect();

        let by_user = group_by_owner(&overdue);
        let mut alerts = 0;
        for (owner, tasks) in &by_user {
            if tasks.len() < OVERDUE_ALERT_THRESHOLD {
                continue;
            }
            let oldest_due = tasks.iter().map(|t| t.due_date).min().unwrap_or(as_of);
            let task_ids = tasks.iter().map(|t| t.id.clone()).collect();
            events.push(NotificationEvent::task_overdue_alert(
                owner.clone(),
                task_ids,
                oldest_due,
                as_of,
            ));
            alerts += 1;
        }

        let report = ScanReport {
            as_of,
            due_today: due.len(),
            overdue_tasks: overdue.len(),
            overdue_users: by_user.len(),
            alerts,
            emitted: 0,
        };
        Ok((events, report))
    }

    /// Scan for `as_of` and emit every event into `sink`.
    #[tracing::instrument(skip(self, sink))]
    pub async fn scan(
        &self,
        as_of: NaiveDate,
        sink: &dyn EventSink,
    ) -> Result<ScanReport, SchedulerError> {
        let (events, mut report) = match self.collect(as_of).await {
            Ok(collected) => collected,
            Err(e) => {
                warn!(error = %e, "scan aborted before emitting");
                return Err(e);
            }
        };

        for event in events {
            sink.emit(event).await?;
            report.emitted += 1;
        }

        info!(
            due_today = report.due_today,
            overdue_tasks = report.overdue_tasks,
            overdue_users = report.overdue_users,
            alerts = report.alerts,
            emitted = report.emitted,
            "scan complete"
        );
        Ok(report)
    }
}

/// Overdue tasks grouped by owner, oldest first within each group.
fn group_by_owner(tasks: &[Task]) -> BTreeMap<UserId, Vec<&Task>> {
    let mut by_user: BTreeMap<UserId, Vec<&Task>> = BTreeMap::new();
    for task in tasks {
        by_user.entry(task.owner.clone()).or_default().push(task);
    }
    for tasks in by_user.values_mut() {
        tasks.sort_by(|a, b| a.due_date.cmp(&b.due_date).then_with(|| a.id.cmp(&b.id)));
    }
    by_user
}
