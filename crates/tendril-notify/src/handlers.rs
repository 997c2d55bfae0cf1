//! Event handler table.
//!
//! Each event kind maps to a handler that names its preference category and
//! renders the channel-neutral message. Adding an event kind means adding a
//! payload variant and one table entry.

use std::collections::{BTreeMap, HashMap};

use crate::types::{Category, EventKind, EventPayload, NotificationEvent};

/// Channel-neutral rendering of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub kind: EventKind,
    pub title: String,
    pub body: String,
    /// Key/value data passed through to the client app.
    pub data: BTreeMap<String, String>,
}

/// Produces a title and body for an event.
pub type RenderFn = fn(&NotificationEvent) -> (String, String);

/// How one event kind is gated and rendered.
#[derive(Debug, Clone, Copy)]
pub struct EventHandler {
    pub category: Category,
    render: RenderFn,
}

impl EventHandler {
    pub fn new(category: Category, render: RenderFn) -> Self {
        Self { category, render }
    }

    pub fn render(&self, event: &NotificationEvent) -> RenderedMessage {
        let (title, body) = (self.render)(event);
        let mut data = BTreeMap::new();
        data.insert("kind".to_string(), event.kind().to_string());
        data.insert("entity".to_string(), event.entity.to_string());
        data.insert("day".to_string(), event.day_bucket.to_string());
        RenderedMessage {
            kind: event.kind(),
            title,
            body,
            data,
        }
    }
}

/// Lookup table from event kind to handler.
#[derive(Debug, Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<EventKind, EventHandler>,
}

impl HandlerTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// The handlers for every built-in event kind.
    pub fn standard() -> Self {
        let mut table = Self::new();
        table.register(
            EventKind::TaskDueReminder,
            EventHandler::new(Category::TaskReminders, render_task_due),
        );
        table.register(
            EventKind::TaskOverdueAlert,
            EventHandler::new(Category::OverdueAlerts, render_overdue),
        );
        table.register(
            EventKind::HarvestReminder,
            EventHandler::new(Category::HarvestReminders, render_harvest),
        );
        table.register(
            EventKind::GrowthRecordAdded,
            EventHandler::new(Category::GrowthUpdates, render_growth),
        );
        table
    }

    /// Add or replace the handler for `kind`.
    pub fn register(&mut self, kind: EventKind, handler: EventHandler) {
        self.handlers.insert(kind, handler);
    }

    pub fn get(&self, kind: EventKind) -> Option<&EventHandler> {
        self.handlers.get(&kind)
    }
}

fn render_task_due(event: &NotificationEvent) -> (String, String) {
    match &event.payload {
        EventPayload::TaskDueReminder { title, .. } => (
            "Task due today".to_string(),
            format!("\"{}\" is due today.", title),
        ),
        _ => render_fallback(event),
    }
}

fn render_overdue(event: &NotificationEvent) -> (String, String) {
    match &event.payload {
        EventPayload::TaskOverdueAlert {
            overdue_count,
            oldest_due,
            ..
        } => (
            format!("{} tasks are overdue", overdue_count),
            format!(
                "You have {} overdue garden tasks, the oldest due on {}.",
                overdue_count,
                oldest_due.format("%b %-d")
            ),
        ),
        _ => render_fallback(event),
    }
}

fn render_harvest(event: &NotificationEvent) -> (String, String) {
    match &event.payload {
        EventPayload::HarvestReminder { crop_name, .. } => (
            "Ready to harvest".to_string(),
            format!("{} should be ready to harvest today.", crop_name),
        ),
        _ => render_fallback(event),
    }
}

fn render_growth(event: &NotificationEvent) -> (String, String) {
    match &event.payload {
        EventPayload::GrowthRecordAdded {
            crop_name, note, ..
        } => (format!("New growth record for {}", crop_name), note.clone()),
        _ => render_fallback(event),
    }
}

fn render_fallback(event: &NotificationEvent) -> (String, String) {
    (
        "Garden update".to_string(),
        format!("Something changed on {}.", event.entity),
    )
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()
    }

    #[test]
    fn test_standard_table_covers_every_kind() {
        let table = HandlerTable::standard();
        for kind in EventKind::ALL {
            assert!(table.get(kind).is_some(), "missing handler for {}", kind);
        }
    }

    #[test]
    fn test_task_due_renders_title_and_data() {
        let event = NotificationEvent::task_due_reminder("u1", "t1", "Water the beans", day());
        let handler = HandlerTable::standard()
            .get(EventKind::TaskDueReminder)
            .copied()
            .unwrap();

        assert_eq!(handler.category, Category::TaskReminders);
        let message = handler.render(&event);
        assert_eq!(message.title, "Task due today");
        assert_eq!(message.body, "\"Water the beans\" is due today.");
        assert_eq!(message.data["entity"], "task:t1");
        assert_eq!(message.data["day"], "2024-07-01");
        assert_eq!(message.data["kind"], "task_due_reminder");
    }

    #[test]
    fn test_overdue_renders_count() {
        let event = NotificationEvent::task_overdue_alert(
            "u1",
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
            day(),
        );
        let message = HandlerTable::standard()
            .get(EventKind::TaskOverdueAlert)
            .unwrap()
            .render(&event);
        assert_eq!(message.title, "4 tasks are overdue");
        assert!(message.body.contains("Jun 3"));
    }

    #[test]
    fn test_mismatched_handler_falls_back() {
        let event = NotificationEvent::harvest_reminder("u1", "c1", "Kale", day());
        let handler = EventHandler::new(Category::TaskReminders, render_task_due);
        let message = handler.render(&event);
        assert_eq!(message.title, "Garden update");
        assert_eq!(message.body, "Something changed on crop:c1.");
    }

    #[test]
    fn test_registering_replaces_handler() {
        fn loud(_: &NotificationEvent) -> (String, String) {
            ("HARVEST".to_string(), "NOW".to_string())
        }
        let mut table = HandlerTable::standard();
        table.register(
            EventKind::HarvestReminder,
            EventHandler::new(Category::HarvestReminders, loud),
        );
        let event = NotificationEvent::harvest_reminder("u1", "c1", "Kale", day());
        let message = table.get(EventKind::HarvestReminder).unwrap().render(&event);
        assert_eq!(message.title, "HARVEST");
    }
}
