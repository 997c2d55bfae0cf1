//! Loading domain state from a JSON snapshot.
//!
//! The daemon does not own users, tasks or devices; it reads them from a
//! snapshot exported by the planner backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tendril_notify::{DeviceEndpoint, DeviceRegistry, InMemoryUserDirectory, Platform, UserId, UserProfile};
use tendril_scheduler::{InMemoryTaskStore, Task};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse snapshot {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A device registration as exported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub user_id: UserId,
    pub platform: Platform,
    pub address: String,
    #[serde(default = "active_by_default")]
    pub active: bool,
    #[serde(default)]
    pub registered_at: Option<DateTime<Utc>>,
}

fn active_by_default() -> bool {
    true
}

/// Users, tasks and devices at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub users: Vec<UserProfile>,
    pub tasks: Vec<Task>,
    pub devices: Vec<DeviceRecord>,
}

impl DeviceRecord {
    fn into_endpoint(self, default_registered_at: DateTime<Utc>) -> DeviceEndpoint {
        DeviceEndpoint {
            user_id: self.user_id,
            platform: self.platform,
            address: self.address,
            active: self.active,
            registered_at: self.registered_at.unwrap_or(default_registered_at),
        }
    }
}

/// In-memory stores built from a snapshot.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<InMemoryUserDirectory>,
    pub tasks: Arc<InMemoryTaskStore>,
    pub devices: Arc<DeviceRegistry>,
}

impl Snapshot {
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SnapshotError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot: Snapshot =
            serde_json::from_str(&raw).map_err(|source| SnapshotError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        info!(
            path = %path.display(),
            users = snapshot.users.len(),
            tasks = snapshot.tasks.len(),
            devices = snapshot.devices.len(),
            "loaded snapshot"
        );
        Ok(snapshot)
    }

    pub fn into_stores(self) -> Stores {
        let devices = DeviceRegistry::new();
        let loaded_at = Utc::now();
        for record in self.devices {
            devices.insert(record.into_endpoint(loaded_at));
        }

        Stores {
            users: Arc::new(InMemoryUserDirectory::from_profiles(self.users)),
            tasks: Arc::new(InMemoryTaskStore::from_tasks(self.tasks)),
            devices: Arc::new(devices),
        }
    }

    /// Replace users and tasks in `stores` with this snapshot's.
    ///
    /// Known device endpoints keep their state, so a deactivation made
    /// since the last load survives. Only registrations that are new, or
    /// that carry a different address, are taken from the snapshot.
    pub async fn refresh(self, stores: &Stores) {
        let users = self.users.len();
        let tasks = self.tasks.len();
        stores.users.replace_all(self.users).await;
        stores.tasks.replace_all(self.tasks).await;

        let loaded_at = Utc::now();
        let mut registered = 0;
        for record in self.devices {
            let known = stores.devices.get(&record.user_id, record.platform);
            if known.is_some_and(|e| e.address == record.address) {
                continue;
            }
            stores.devices.insert(record.into_endpoint(loaded_at));
            registered += 1;
        }

        info!(users, tasks, registered, "refreshed stores from snapshot");
    }
}
