//! Deduplication claims.
//!
//! A claim is a key with an expiry. The first caller to claim a key inside
//! its TTL wins; every other caller sees the live claim and backs off.
//! Claims are never released early, they only expire.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::debug;

use crate::NotifyError;
use crate::types::NotificationEvent;

/// How long a delivery claim blocks repeats of the same logical event.
pub const DEFAULT_CLAIM_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Atomic check-and-set claim primitive.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Claim `key` for `ttl`. Returns `true` exactly once per key while a claim is live.
    async fn try_claim(&self, key: &str, ttl: Duration) -> Result<bool, NotifyError>;
}

/// Derive the dedup key for an event: hash of (kind, entity, day bucket).
pub fn dedup_key(event: &NotificationEvent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event.kind().as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(event.entity.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(event.day_bucket.format("%Y-%m-%d").to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// In-memory claim store backed by a sharded map.
///
/// The entry API holds the shard lock across the check and the insert, so
/// concurrent claims of the same key cannot both succeed.
#[derive(Debug, Default)]
pub struct InMemoryDedupStore {
    claims: DashMap<String, Instant>,
}

impl InMemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous claim, shared by the trait impl.
    pub fn claim(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        match self.claims.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    return false;
                }
                entry.insert(now + ttl);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(now + ttl);
                true
            }
        }
    }

    /// Drop expired claims. Live claims are untouched.
    ///
    /// Returns the number of claims removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.claims.len();
        self.claims.retain(|_, expires_at| *expires_at > now);
        let removed = before.saturating_sub(self.claims.len());
        if removed > 0 {
            debug!(removed, remaining = self.claims.len(), "swept expired dedup claims");
        }
        removed
    }

    /// Number of stored claims, expired or not.
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn try_claim(&self, key: &str, ttl: Duration) -> Result<bool, NotifyError> {
        Ok(self.claim(key, ttl))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;

    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, d).unwrap()
    }

    #[tokio::test]
    async fn test_second_claim_in_succession_fails() {
        let store = InMemoryDedupStore::new();
        let first = store.try_claim("k", DEFAULT_CLAIM_TTL).await.unwrap();
        let second = store.try_claim("k", DEFAULT_CLAIM_TTL).await.unwrap();
        assert_eq!((first, second), (true, false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_is_available_again_after_expiry() {
        let store = InMemoryDedupStore::new();
        let ttl = Duration::from_secs(60);
        assert!(store.claim("k", ttl));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!store.claim("k", ttl));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.claim("k", ttl));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_only_removes_expired_claims() {
        let store = InMemoryDedupStore::new();
        store.claim("short", Duration::from_secs(10));
        store.claim("long", Duration::from_secs(100));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.sweep(), 1);
        assert_eq!(store.len(), 1);
        assert!(!store.claim("long", Duration::from_secs(100)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_have_a_single_winner() {
        let store = Arc::new(InMemoryDedupStore::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.try_claim("same", DEFAULT_CLAIM_TTL).await.unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_key_depends_on_kind_entity_and_day() {
        let a = NotificationEvent::harvest_reminder("u1", "crop-1", "Beans", day(1));
        let same = NotificationEvent::harvest_reminder("u1", "crop-1", "Beans", day(1));
        let next_day = NotificationEvent::harvest_reminder("u1", "crop-1", "Beans", day(2));
        let other_crop = NotificationEvent::harvest_reminder("u1", "crop-2", "Beans", day(1));
        let other_kind =
            NotificationEvent::growth_record_added("u1", "crop-1", "Beans", "first leaves", day(1));

        assert_eq!(dedup_key(&a), dedup_key(&same));
        assert_ne!(dedup_key(&a), dedup_key(&next_day));
        assert_ne!(dedup_key(&a), dedup_key(&other_crop));
        assert_ne!(dedup_key(&a), dedup_key(&other_kind));
        assert_eq!(dedup_key(&a).len(), 64);
    }
}
