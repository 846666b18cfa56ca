//! Sync state tracking and persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use carecache_common::{CollectionName, Error, Record, Result};
use carecache_store::RecordStore;

/// Phase of a collection's sync state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    /// No sync running, last attempt (if any) succeeded.
    Idle,
    /// A sync is in flight.
    Syncing,
    /// The last attempt failed; local data is stale but available.
    Error,
}

/// Per-collection sync metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    /// Collection this state belongs to.
    pub collection: CollectionName,
    /// Last successful sync time.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Maximum age of local data before it counts as stale.
    pub sync_interval: Duration,
    /// Whether a sync is currently in progress.
    pub is_syncing: bool,
    /// Last error message if the last attempt failed.
    pub last_error: Option<String>,
    /// Current phase.
    pub phase: SyncPhase,
    /// Number of records written by the last successful sync.
    #[serde(default)]
    pub record_count: usize,
}

impl SyncState {
    /// Create a fresh state for a collection that was never synced.
    pub fn new(collection: CollectionName, sync_interval: Duration) -> Self {
        Self {
            collection,
            last_synced_at: None,
            sync_interval,
            is_syncing: false,
            last_error: None,
            phase: SyncPhase::Idle,
            record_count: 0,
        }
    }

    /// Key of this state in the store's bookkeeping table.
    pub fn meta_key(collection: &CollectionName) -> String {
        format!("sync_state:{}", collection)
    }

    /// Whether local data is older than the sync interval at `now`.
    ///
    /// A collection that was never synced is always stale. A timestamp in
    /// the future (clock skew) counts as fresh.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.last_synced_at {
            None => true,
            Some(at) => (now - at)
                .to_std()
                .map(|elapsed| elapsed > self.sync_interval)
                .unwrap_or(false),
        }
    }

    /// Mark as syncing.
    pub fn mark_syncing(&mut self) {
        self.is_syncing = true;
        self.phase = SyncPhase::Syncing;
    }

    /// Mark as synced successfully.
    pub fn mark_synced(&mut self, at: DateTime<Utc>, record_count: usize) {
        self.is_syncing = false;
        self.phase = SyncPhase::Idle;
        self.last_synced_at = Some(at);
        self.last_error = None;
        self.record_count = record_count;
    }

    /// Mark as failed.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.is_syncing = false;
        self.phase = SyncPhase::Error;
        self.last_error = Some(error.into());
    }

    /// Leave `Syncing` for a sync that ended without an outcome.
    ///
    /// The phase falls back to what the last recorded outcome implies.
    pub fn abandon_syncing(&mut self) {
        self.is_syncing = false;
        if self.phase == SyncPhase::Syncing {
            self.phase = if self.last_error.is_some() {
                SyncPhase::Error
            } else {
                SyncPhase::Idle
            };
        }
    }

    /// Load persisted state for a collection, or a fresh one.
    ///
    /// The interval always comes from the caller's configuration and a
    /// reloaded state never claims to be syncing. Unreadable bookkeeping is
    /// treated as "never synced".
    pub async fn load(
        store: &dyn RecordStore,
        collection: &CollectionName,
        sync_interval: Duration,
    ) -> Result<Self> {
        let fresh = Self::new(collection.clone(), sync_interval);
        let Some(value) = store.get_meta(&Self::meta_key(collection)).await? else {
            return Ok(fresh);
        };

        match serde_json::from_value::<SyncState>(value) {
            Ok(mut state) => {
                state.collection = collection.clone();
                state.sync_interval = sync_interval;
                state.is_syncing = false;
                state.phase = if state.last_error.is_some() {
                    SyncPhase::Error
                } else {
                    SyncPhase::Idle
                };
                Ok(state)
            }
            Err(e) => {
                warn!("Discarding unreadable sync state for '{}': {}", collection, e);
                Ok(fresh)
            }
        }
    }

    /// Persist this state into the store's bookkeeping table.
    pub async fn save(&self, store: &dyn RecordStore) -> Result<()> {
        let mut persisted = self.clone();
        persisted.is_syncing = false;
        if persisted.phase == SyncPhase::Syncing {
            persisted.phase = SyncPhase::Idle;
        }
        let value =
            serde_json::to_value(&persisted).map_err(|e| Error::Serialization(e.to_string()))?;
        store.set_meta(&Self::meta_key(&self.collection), value).await
    }

    /// Remove persisted state.
    pub async fn forget(store: &dyn RecordStore, collection: &CollectionName) -> Result<()> {
        store.delete_meta(&Self::meta_key(collection)).await
    }
}

/// What consumers of a mounted collection observe.
#[derive(Debug, Clone)]
pub struct CollectionSnapshot {
    pub records: Vec<Record>,
    /// True only while an empty collection waits for its first sync.
    pub loading: bool,
    pub is_syncing: bool,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub phase: SyncPhase,
}

impl CollectionSnapshot {
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            loading: true,
            is_syncing: false,
            last_synced_at: None,
            error: None,
            phase: SyncPhase::Idle,
        }
    }
}
