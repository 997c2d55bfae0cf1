//! Core notification types.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a user account.
pub type UserId = String;

/// The kinds of domain events this subsystem knows how to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskDueReminder,
    TaskOverdueAlert,
    HarvestReminder,
    GrowthRecordAdded,
}

impl EventKind {
    /// Every event kind, in a stable order.
    pub const ALL: [EventKind; 4] = [
        EventKind::TaskDueReminder,
        EventKind::TaskOverdueAlert,
        EventKind::HarvestReminder,
        EventKind::GrowthRecordAdded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TaskDueReminder => "task_due_reminder",
            EventKind::TaskOverdueAlert => "task_overdue_alert",
            EventKind::HarvestReminder => "harvest_reminder",
            EventKind::GrowthRecordAdded => "growth_record_added",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Preference category that gates one or more event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    TaskReminders,
    OverdueAlerts,
    HarvestReminders,
    GrowthUpdates,
}

/// Reference to the entity an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum EntityRef {
    Task(String),
    Crop(String),
    Plot(String),
    User(String),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Task(id) => write!(f, "task:{}", id),
            EntityRef::Crop(id) => write!(f, "crop:{}", id),
            EntityRef::Plot(id) => write!(f, "plot:{}", id),
            EntityRef::User(id) => write!(f, "user:{}", id),
        }
    }
}

/// Kind-specific event data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    TaskDueReminder {
        task_id: String,
        title: String,
        due_date: NaiveDate,
    },
    TaskOverdueAlert {
        overdue_count: usize,
        task_ids: Vec<String>,
        oldest_due: NaiveDate,
    },
    HarvestReminder {
        crop_id: String,
        crop_name: String,
    },
    GrowthRecordAdded {
        crop_id: String,
        crop_name: String,
        note: String,
    },
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::TaskDueReminder { .. } => EventKind::TaskDueReminder,
            EventPayload::TaskOverdueAlert { .. } => EventKind::TaskOverdueAlert,
            EventPayload::HarvestReminder { .. } => EventKind::HarvestReminder,
            EventPayload::GrowthRecordAdded { .. } => EventKind::GrowthRecordAdded,
        }
    }
}

/// A domain event addressed to a single user.
///
/// Events are ephemeral: created by a domain action (or the due scanner),
/// consumed once by the processor, then dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// User who should receive the notification.
    pub user_id: UserId,
    /// Entity the event is about.
    pub entity: EntityRef,
    /// Kind-specific data.
    pub payload: EventPayload,
    /// Calendar day the event refers to. Part of the dedup key.
    pub day_bucket: NaiveDate,
    /// When the event was created.
    pub created_at: DateTime<Utc>,
}

impl NotificationEvent {
    /// Reminder for a task due on `due_date`.
    pub fn task_due_reminder(
        user_id: impl Into<UserId>,
        task_id: impl Into<String>,
        title: impl Into<String>,
        due_date: NaiveDate,
    ) -> Self {
        let task_id = task_id.into();
        Self {
            user_id: user_id.into(),
            entity: EntityRef::Task(task_id.clone()),
            payload: EventPayload::TaskDueReminder {
                task_id,
                title: title.into(),
                due_date,
            },
            day_bucket: due_date,
            created_at: Utc::now(),
        }
    }

    /// Aggregated alert for all of a user's overdue tasks as of `as_of`.
    pub fn task_overdue_alert(
        user_id: impl Into<UserId>,
        task_ids: Vec<String>,
        oldest_due: NaiveDate,
        as_of: NaiveDate,
    ) -> Self {
        let user_id = user_id.into();
        Self {
            entity: EntityRef::User(user_id.clone()),
            user_id,
            payload: EventPayload::TaskOverdueAlert {
                overdue_count: task_ids.len(),
                task_ids,
                oldest_due,
            },
            day_bucket: as_of,
            created_at: Utc::now(),
        }
    }

    /// Reminder that a crop is ready to harvest on `on`.
    pub fn harvest_reminder(
        user_id: impl Into<UserId>,
        crop_id: impl Into<String>,
        crop_name: impl Into<String>,
        on: NaiveDate,
    ) -> Self {
        let crop_id = crop_id.into();
        Self {
            user_id: user_id.into(),
            entity: EntityRef::Crop(crop_id.clone()),
            payload: EventPayload::HarvestReminder {
                crop_id,
                crop_name: crop_name.into(),
            },
            day_bucket: on,
            created_at: Utc::now(),
        }
    }

    /// A growth record was added to a crop on `on`.
    pub fn growth_record_added(
        user_id: impl Into<UserId>,
        crop_id: impl Into<String>,
        crop_name: impl Into<String>,
        note: impl Into<String>,
        on: NaiveDate,
    ) -> Self {
        let crop_id = crop_id.into();
        Self {
            user_id: user_id.into(),
            entity: EntityRef::Crop(crop_id.clone()),
            payload: EventPayload::GrowthRecordAdded {
                crop_id,
                crop_name: crop_name.into(),
                note: note.into(),
            },
            day_bucket: on,
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

/// A delivery medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Push,
    Email,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Push => f.write_str("push"),
            Channel::Email => f.write_str("email"),
        }
    }
}

/// Push platform of a registered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Ios,
    Android,
    Web,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Web => "web",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-user notification switches. Everything is on unless the user says otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationPreferences {
    pub task_reminders: bool,
    pub overdue_alerts: bool,
    pub harvest_reminders: bool,
    pub growth_updates: bool,
    pub push_enabled: bool,
    pub email_enabled: bool,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            task_reminders: true,
            overdue_alerts: true,
            harvest_reminders: true,
            growth_updates: true,
            push_enabled: true,
            email_enabled: true,
        }
    }
}

impl NotificationPreferences {
    /// Whether events in `category` may be delivered at all.
    pub fn allows(&self, category: Category) -> bool {
        match category {
            Category::TaskReminders => self.task_reminders,
            Category::OverdueAlerts => self.overdue_alerts,
            Category::HarvestReminders => self.harvest_reminders,
            Category::GrowthUpdates => self.growth_updates,
        }
    }

    /// Whether the user accepts notifications on `channel`.
    pub fn channel_enabled(&self, channel: Channel) -> bool {
        match channel {
            Channel::Push => self.push_enabled,
            Channel::Email => self.email_enabled,
        }
    }
}

/// What the processor needs to know about a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferences: NotificationPreferences,
}

impl UserProfile {
    /// The user's email address, if it looks deliverable.
    pub fn usable_email(&self) -> Option<&str> {
        let email = self.email.as_deref()?.trim();
        let (local, domain) = email.split_once('@')?;
        if local.is_empty() || domain.is_empty() || email.contains(char::is_whitespace) {
            return None;
        }
        Some(email)
    }
}
