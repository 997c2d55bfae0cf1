//! Notification event processor.
//!
//! For each event: look up the handler, load the user's profile, check the
//! category preference, claim the dedup key, render, then dispatch to every
//! eligible channel concurrently. A channel failure is reported in the
//! outcome and never affects the other channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::dedup::{DEFAULT_CLAIM_TTL, DedupStore, dedup_key};
use crate::dispatch::{EmailDispatcher, PushDispatcher};
use crate::error::{DeliveryError, NotifyError};
use crate::handlers::HandlerTable;
use crate::retry::Cancellation;
use crate::types::{Channel, EventKind, NotificationEvent, UserId, UserProfile};

/// Read-only access to user profiles and preferences.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `Ok(None)` if the user does not exist.
    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, NotifyError>;
}

/// User directory backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<UserId, UserProfile>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_profiles(profiles: impl IntoIterator<Item = UserProfile>) -> Self {
        let users = profiles
            .into_iter()
            .map(|p| (p.user_id.clone(), p))
            .collect();
        Self {
            users: RwLock::new(users),
        }
    }

    /// Swap in a fresh set of profiles, dropping users no longer present.
    pub async fn replace_all(&self, profiles: impl IntoIterator<Item = UserProfile>) {
        let users = profiles
            .into_iter()
            .map(|p| (p.user_id.clone(), p))
            .collect();
        *self.users.write().await = users;
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn profile(&self, user_id: &str) -> Result<Option<UserProfile>, NotifyError> {
        Ok(self.users.read().await.get(user_id).cloned())
    }
}

/// Why an event produced no delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UnknownEventKind,
    UserNotFound,
    UserOptedOut,
    Duplicate,
    NoEligibleChannel,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::UnknownEventKind => "unknown event kind",
            SkipReason::UserNotFound => "user not found",
            SkipReason::UserOptedOut => "user opted out",
            SkipReason::Duplicate => "duplicate",
            SkipReason::NoEligibleChannel => "no eligible channel",
        };
        f.write_str(s)
    }
}

/// Result of processing one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every attempted channel succeeded.
    Delivered(Vec<Channel>),
    Skipped(SkipReason),
    /// At least one attempted channel failed. `delivered` may be empty.
    PartiallyDelivered {
        delivered: Vec<Channel>,
        failures: Vec<DeliveryError>,
    },
}

impl Outcome {
    pub fn delivered_channels(&self) -> &[Channel] {
        match self {
            Outcome::Delivered(channels) => channels,
            Outcome::PartiallyDelivered { delivered, .. } => delivered,
            Outcome::Skipped(_) => &[],
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped(_))
    }
}

/// Counts over a batch of processed events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub delivered: usize,
    pub partial: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn record(&mut self, result: &Result<Outcome, NotifyError>) {
        match result {
            Ok(Outcome::Delivered(_)) => self.delivered += 1,
            Ok(Outcome::PartiallyDelivered { .. }) => self.partial += 1,
            Ok(Outcome::Skipped(_)) => self.skipped += 1,
            Err(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.delivered + self.partial + self.skipped + self.failed
    }
}

/// Gates, deduplicates, renders and dispatches notification events.
pub struct Processor {
    users: Arc<dyn UserDirectory>,
    dedup: Arc<dyn DedupStore>,
    handlers: HandlerTable,
    push: PushDispatcher,
    email: EmailDispatcher,
    claim_ttl: Duration,
}

impl Processor {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        dedup: Arc<dyn DedupStore>,
        handlers: HandlerTable,
        push: PushDispatcher,
        email: EmailDispatcher,
    ) -> Self {
        Self {
            users,
            dedup,
            handlers,
            push,
            email,
            claim_ttl: DEFAULT_CLAIM_TTL,
        }
    }

    pub fn with_claim_ttl(mut self, ttl: Duration) -> Self {
        self.claim_ttl = ttl;
        self
    }

    /// Process one event.
    ///
    /// Errors are reserved for failures of the directory or the dedup store;
    /// delivery failures are reported inside [`Outcome::PartiallyDelivered`].
    #[tracing::instrument(skip(self, event, cancel), fields(kind = %event.kind(), user_id = %event.user_id, entity = %event.entity))]
    pub async fn process(
        &self,
        event: &NotificationEvent,
        cancel: &Cancellation,
    ) -> Result<Outcome, NotifyError> {
        let kind: EventKind = event.kind();
        let Some(handler) = self.handlers.get(kind) else {
            warn!("no handler registered, dropping event");
            return Ok(Outcome::Skipped(SkipReason::UnknownEventKind));
        };

        let Some(profile) = self.users.profile(&event.user_id).await? else {
            warn!("target user not found");
            return Ok(Outcome::Skipped(SkipReason::UserNotFound));
        };

        if !profile.preferences.allows(handler.category) {
            debug!(category = ?handler.category, "user opted out");
            return Ok(Outcome::Skipped(SkipReason::UserOptedOut));
        }

        let key = dedup_key(event);
        if !self.dedup.try_claim(&key, self.claim_ttl).await? {
            debug!(%key, "duplicate event");
            return Ok(Outcome::Skipped(SkipReason::Duplicate));
        }

        let prefs = &profile.preferences;
        let push_eligible =
            prefs.channel_enabled(Channel::Push) && self.push.has_target(&event.user_id);
        let email_address = if prefs.channel_enabled(Channel::Email) {
            profile.usable_email()
        } else {
            None
        };

        if !push_eligible && email_address.is_none() {
            info!("no eligible channel");
            return Ok(Outcome::Skipped(SkipReason::NoEligibleChannel));
        }

        let message = handler.render(event);

        let push = async {
            if push_eligible {
                Some(self.push.send(&message, &event.user_id, cancel).await)
            } else {
                None
            }
        };
        let email = async {
            match email_address {
                Some(address) => Some(self.email.send(&message, address, cancel).await),
                None => None,
            }
        };
        let (push, email) = tokio::join!(push, email);

        let mut delivered = Vec::new();
        let mut failures = Vec::new();
        for result in [push, email].into_iter().flatten() {
            match result {
                Ok(receipt) => delivered.push(receipt.channel),
                Err(e) => failures.push(e),
            }
        }

        if failures.is_empty() {
            info!(channels = ?delivered, "notification delivered");
            Ok(Outcome::Delivered(delivered))
        } else {
            warn!(
                channels = ?delivered,
                failed = failures.len(),
                "notification partially delivered"
            );
            Ok(Outcome::PartiallyDelivered {
                delivered,
                failures,
            })
        }
    }

    /// Process a batch with up to `concurrency` events in flight.
    ///
    /// One event's failure never stops its siblings.
    pub async fn process_all(
        &self,
        events: Vec<NotificationEvent>,
        concurrency: usize,
        cancel: &Cancellation,
    ) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let mut results = stream::iter(events)
            .map(|event| async move {
                let result = self.process(&event, cancel).await;
                if let Err(e) = &result {
                    warn!(kind = %event.kind(), user_id = %event.user_id, error = %e, "event processing failed");
                }
                result
            })
            .buffer_unordered(concurrency.max(1));

        while let Some(result) = results.next().await {
            summary.record(&result);
        }
        summary
    }
}
