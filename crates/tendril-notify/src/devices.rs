//! Device endpoint registry.
//!
//! One endpoint per (user, platform). Registering again replaces the
//! previous address. Endpoints reported as invalid by the push gateway are
//! deactivated in place, never removed.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::{Platform, UserId};

/// A push delivery address for one of a user's devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEndpoint {
    pub user_id: UserId,
    pub platform: Platform,
    /// Opaque provider token.
    pub address: String,
    pub active: bool,
    pub registered_at: DateTime<Utc>,
}

/// Thread-safe registry of device endpoints, keyed by user.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    endpoints: DashMap<UserId, HashMap<Platform, DeviceEndpoint>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a device, replacing any prior endpoint for the platform.
    pub fn register(
        &self,
        user_id: impl Into<UserId>,
        platform: Platform,
        address: impl Into<String>,
    ) -> DeviceEndpoint {
        let endpoint = DeviceEndpoint {
            user_id: user_id.into(),
            platform,
            address: address.into(),
            active: true,
            registered_at: Utc::now(),
        };
        self.insert(endpoint.clone());
        debug!(user_id = %endpoint.user_id, %platform, "registered device endpoint");
        endpoint
    }

    /// Insert a fully-formed endpoint (used when loading persisted state).
    pub fn insert(&self, endpoint: DeviceEndpoint) {
        self.endpoints
            .entry(endpoint.user_id.clone())
            .or_default()
            .insert(endpoint.platform, endpoint);
    }

    /// Current endpoint for a (user, platform) pair, active or not.
    pub fn get(&self, user_id: &str, platform: Platform) -> Option<DeviceEndpoint> {
        self.endpoints
            .get(user_id)
            .and_then(|by_platform| by_platform.get(&platform).cloned())
    }

    /// Active endpoints for a user, ordered by platform for stable fan-out.
    pub fn active_endpoints(&self, user_id: &str) -> Vec<DeviceEndpoint> {
        let mut active: Vec<DeviceEndpoint> = self
            .endpoints
            .get(user_id)
            .map(|by_platform| {
                by_platform
                    .values()
                    .filter(|e| e.active)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        active.sort_by_key(|e| e.platform.as_str());
        active
    }

    pub fn has_active_endpoint(&self, user_id: &str) -> bool {
        self.endpoints
            .get(user_id)
            .is_some_and(|by_platform| by_platform.values().any(|e| e.active))
    }

    /// Mark an endpoint inactive if it still holds `address`.
    ///
    /// Idempotent. A stale failure for an address that has since been
    /// replaced by a newer registration leaves the new endpoint alone.
    /// Returns `true` only for the call that flipped the flag.
    pub fn deactivate(&self, user_id: &str, platform: Platform, address: &str) -> bool {
        let Some(mut by_platform) = self.endpoints.get_mut(user_id) else {
            return false;
        };
        match by_platform.get_mut(&platform) {
            Some(endpoint) if endpoint.address == address && endpoint.active => {
                endpoint.active = false;
                info!(user_id, %platform, "deactivated invalid device endpoint");
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_latest_registration_replaces_prior() {
        let registry = DeviceRegistry::new();
        registry.register("u1", Platform::Ios, "old-token");
        registry.register("u1", Platform::Ios, "new-token");

        let active = registry.active_endpoints("u1");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].address, "new-token");
    }

    #[test]
    fn test_deactivated_endpoint_is_excluded() {
        let registry = DeviceRegistry::new();
        registry.register("u1", Platform::Ios, "ios-token");
        registry.register("u1", Platform::Android, "android-token");

        assert!(registry.deactivate("u1", Platform::Ios, "ios-token"));

        let active = registry.active_endpoints("u1");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].platform, Platform::Android);
        // kept, not deleted
        assert!(!registry.get("u1", Platform::Ios).unwrap().active);
    }

    #[test]
    fn test_deactivation_is_idempotent() {
        let registry = DeviceRegistry::new();
        registry.register("u1", Platform::Web, "token");

        assert!(registry.deactivate("u1", Platform::Web, "token"));
        assert!(!registry.deactivate("u1", Platform::Web, "token"));
        assert!(!registry.has_active_endpoint("u1"));
    }

    #[test]
    fn test_stale_failure_does_not_deactivate_newer_registration() {
        let registry = DeviceRegistry::new();
        registry.register("u1", Platform::Ios, "old-token");
        registry.register("u1", Platform::Ios, "new-token");

        assert!(!registry.deactivate("u1", Platform::Ios, "old-token"));
        assert!(registry.has_active_endpoint("u1"));
    }

    #[test]
    fn test_reregistering_reactivates() {
        let registry = DeviceRegistry::new();
        registry.register("u1", Platform::Ios, "token");
        registry.deactivate("u1", Platform::Ios, "token");
        registry.register("u1", Platform::Ios, "fresh");
        assert!(registry.has_active_endpoint("u1"));
    }

    #[test]
    fn test_concurrent_deactivations_flip_once() {
        let registry = Arc::new(DeviceRegistry::new());
        registry.register("u1", Platform::Android, "token");

        let flips: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let registry = Arc::clone(&registry);
                    scope.spawn(move || registry.deactivate("u1", Platform::Android, "token"))
                })
                .collect();
            handles
                .into_iter()
                .map(|h| usize::from(h.join().unwrap()))
                .sum()
        });

        assert_eq!(flips, 1);
        assert!(!registry.has_active_endpoint("u1"));
    }
}
