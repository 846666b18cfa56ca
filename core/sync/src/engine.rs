//! Per-collection sync engine.
//!
//! Each engine owns one collection's lifecycle: it publishes whatever is in
//! the local store first, then refreshes from the remote source when the
//! local copy is missing or stale. Remote failures never clear local data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use carecache_common::{CollectionName, ConnectivityMonitor, Error, Record, Result};
use carecache_store::RecordStore;

use crate::remote::RemoteSource;
use crate::retry::{RetryConfig, RetryExecutor};
use crate::scheduler::{SkipReason, SyncOutcome, SyncResult, SyncScheduler, SyncTrigger};
use crate::state::{CollectionSnapshot, SyncPhase, SyncState};

/// Wall-clock source used for staleness decisions.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Sync engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum age of local data, and the period of background refreshes.
    pub sync_interval: Duration,
    /// Run a background refresh every `sync_interval` while online.
    pub periodic: bool,
    /// Upper bound on a single remote fetch attempt.
    pub fetch_timeout: Option<Duration>,
    pub retry: RetryConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(5 * 60),
            periodic: true,
            fetch_timeout: Some(Duration::from_secs(30)),
            retry: RetryConfig::default(),
        }
    }
}

impl SyncConfig {
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_periodic(mut self, periodic: bool) -> Self {
        self.periodic = periodic;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Held for the duration of one sync.
///
/// Always releases the single-flight flag. A sync dropped before it
/// settled (its task was aborted) also leaves the `Syncing` phase, in
/// memory and in the published snapshot.
struct SyncGuard<'a> {
    engine: &'a SyncEngine,
    settled: bool,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let phase = match self.engine.state.try_write() {
                Ok(mut state) => {
                    state.abandon_syncing();
                    state.phase
                }
                Err(_) => SyncPhase::Idle,
            };
            warn!("Sync of '{}' was cancelled", self.engine.collection);
            self.engine.snapshot.send_modify(|snap| {
                snap.is_syncing = false;
                snap.loading = false;
                snap.phase = phase;
            });
        }
        self.engine.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Sync engine for one collection.
pub struct SyncEngine {
    collection: CollectionName,
    store: Arc<dyn RecordStore>,
    source: Arc<dyn RemoteSource>,
    connectivity: Arc<ConnectivityMonitor>,
    config: SyncConfig,
    retry: RetryExecutor,
    clock: Clock,
    state: RwLock<SyncState>,
    in_flight: AtomicBool,
    snapshot: watch::Sender<CollectionSnapshot>,
}

impl SyncEngine {
    /// Create an engine, restoring persisted sync state.
    ///
    /// # Errors
    /// - Store fault while reading bookkeeping
    pub async fn new(
        collection: CollectionName,
        store: Arc<dyn RecordStore>,
        source: Arc<dyn RemoteSource>,
        connectivity: Arc<ConnectivityMonitor>,
        config: SyncConfig,
    ) -> Result<Self> {
        let state = SyncState::load(store.as_ref(), &collection, config.sync_interval).await?;
        let (snapshot, _) = watch::channel(CollectionSnapshot::empty());

        debug!(
            "Sync engine for '{}' ready (source: {}, last synced: {:?})",
            collection,
            source.describe(),
            state.last_synced_at
        );

        Ok(Self {
            collection,
            store,
            source,
            connectivity,
            retry: RetryExecutor::new(config.retry.clone()),
            config,
            clock: Arc::new(Utc::now),
            state: RwLock::new(state),
            in_flight: AtomicBool::new(false),
            snapshot,
        })
    }

    /// Replace the wall clock.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn collection(&self) -> &CollectionName {
        &self.collection
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    /// Current sync state.
    pub async fn state(&self) -> SyncState {
        self.state.read().await.clone()
    }

    /// Whether a sync is currently running.
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Local records, never touching the network.
    pub async fn records(&self) -> Result<Vec<Record>> {
        self.store.get_all(&self.collection).await
    }

    /// Refresh from remote if online and stale.
    pub async fn sync(&self) -> Result<SyncResult> {
        self.run(SyncTrigger::Manual).await
    }

    /// Refresh from remote now, ignoring connectivity and staleness.
    ///
    /// A sync already in flight still wins; the forced call is skipped.
    pub async fn force_sync(&self) -> Result<SyncResult> {
        self.run(SyncTrigger::Forced).await
    }

    /// Remove local records and sync state for this collection.
    pub async fn reset(&self) -> Result<()> {
        self.store.clear(&self.collection).await?;
        SyncState::forget(self.store.as_ref(), &self.collection).await?;

        let mut state = self.state.write().await;
        *state = SyncState::new(self.collection.clone(), self.config.sync_interval);
        drop(state);

        self.snapshot.send_modify(|snap| {
            snap.records.clear();
            snap.last_synced_at = None;
            snap.error = None;
            snap.phase = SyncPhase::Idle;
        });
        info!("Reset collection '{}'", self.collection);
        Ok(())
    }

    /// Mount the collection for a consumer.
    ///
    /// The first snapshot holds the local records and is published before
    /// any network activity. A refresh is started in the background when
    /// local data is empty or stale and the device is online. While the
    /// returned handle lives, a periodic refresh runs every sync interval
    /// whenever the device is online.
    ///
    /// # Errors
    /// - Store fault while reading local records
    pub async fn mount(self: &Arc<Self>) -> Result<CollectionHandle> {
        let records = self.store.get_all(&self.collection).await?;
        let state = self.state().await;
        let now = (self.clock)();

        let needs_sync = records.is_empty() || state.is_stale(now);
        let will_sync = needs_sync && self.connectivity.is_online();

        self.snapshot.send_replace(CollectionSnapshot {
            loading: will_sync && records.is_empty(),
            records,
            is_syncing: self.is_syncing(),
            last_synced_at: state.last_synced_at,
            error: state.last_error.clone(),
            phase: state.phase,
        });
        let receiver = self.snapshot.subscribe();

        if will_sync {
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                engine.run_logged(SyncTrigger::Mount).await;
            });
        } else if needs_sync {
            debug!(
                "'{}' needs a refresh but the device is offline",
                self.collection
            );
        }

        let scheduler = SyncScheduler::spawn(Arc::clone(self));

        Ok(CollectionHandle {
            engine: Arc::clone(self),
            receiver,
            scheduler,
        })
    }

    /// Run a sync and log instead of returning failures.
    pub(crate) async fn run_logged(&self, trigger: SyncTrigger) {
        match self.run(trigger).await {
            Ok(result) => debug!("{:?} sync of '{}': {:?}", trigger, self.collection, result.outcome),
            Err(e) => warn!("{:?} sync of '{}' failed: {}", trigger, self.collection, e),
        }
    }

    /// Core state machine.
    ///
    /// Returns `Err` only when the local store itself fails; remote
    /// failures are reported through [`SyncOutcome::Failed`] together with
    /// the surviving local records.
    pub(crate) async fn run(&self, trigger: SyncTrigger) -> Result<SyncResult> {
        let start = Instant::now();

        if trigger.respects_offline() && self.connectivity.is_offline() {
            debug!("Skipping sync of '{}': offline", self.collection);
            return self.skipped(SkipReason::Offline, start).await;
        }

        if trigger.respects_staleness() && !self.state.read().await.is_stale((self.clock)()) {
            debug!("Skipping sync of '{}': data is fresh", self.collection);
            return self.skipped(SkipReason::Fresh, start).await;
        }

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Skipping sync of '{}': already in flight", self.collection);
            return self.skipped(SkipReason::InFlight, start).await;
        }
        let mut guard = SyncGuard {
            engine: self,
            settled: false,
        };

        self.state.write().await.mark_syncing();
        self.snapshot.send_modify(|snap| {
            snap.is_syncing = true;
            snap.phase = SyncPhase::Syncing;
        });

        info!("Syncing '{}' ({:?})", self.collection, trigger);

        let written = match self.fetch_remote().await {
            Ok(records) => self.write_through(records).await,
            Err(e) => Err(e),
        };

        let result = match written {
            Ok(records) => self.finish_synced(records, start).await,
            Err(e) => self.finish_failed(e, start).await,
        };
        guard.settled = true;
        result
    }

    /// Replace the collection and read back what the store now holds.
    ///
    /// The store keys records by id, so duplicates in the fetched list
    /// collapse and the result comes back in store order.
    async fn write_through(&self, records: Vec<Record>) -> Result<Vec<Record>> {
        let fetched = records.len();
        self.store.replace_all(&self.collection, records).await?;
        let stored = self.store.get_all(&self.collection).await?;
        if stored.len() != fetched {
            warn!(
                "Remote returned {} records for '{}', {} distinct ids kept",
                fetched,
                self.collection,
                stored.len()
            );
        }
        Ok(stored)
    }

    async fn fetch_remote(&self) -> Result<Vec<Record>> {
        let timeout = self.config.fetch_timeout;
        self.retry
            .execute(|| {
                let source = Arc::clone(&self.source);
                async move {
                    match timeout {
                        Some(limit) => tokio::time::timeout(limit, source.fetch_all())
                            .await
                            .map_err(|_| {
                                Error::Timeout(format!("Remote fetch exceeded {:?}", limit))
                            })?,
                        None => source.fetch_all().await,
                    }
                }
            })
            .await
    }

    async fn finish_synced(&self, records: Vec<Record>, start: Instant) -> Result<SyncResult> {
        let now = (self.clock)();
        let count = records.len();

        let state = {
            let mut state = self.state.write().await;
            state.mark_synced(now, count);
            state.clone()
        };
        if let Err(e) = state.save(self.store.as_ref()).await {
            warn!("Failed to persist sync state for '{}': {}", self.collection, e);
        }

        self.snapshot.send_modify(|snap| {
            snap.records = records.clone();
            snap.loading = false;
            snap.is_syncing = false;
            snap.last_synced_at = Some(now);
            snap.error = None;
            snap.phase = SyncPhase::Idle;
        });

        info!("Synced {} records into '{}'", count, self.collection);
        Ok(SyncResult {
            collection: self.collection.clone(),
            outcome: SyncOutcome::Synced { records: count },
            records,
            duration: start.elapsed(),
        })
    }

    async fn finish_failed(&self, error: Error, start: Instant) -> Result<SyncResult> {
        let message = error.to_string();
        warn!("Sync of '{}' failed: {}", self.collection, message);

        let state = {
            let mut state = self.state.write().await;
            state.mark_failed(message.clone());
            state.clone()
        };
        if let Err(e) = state.save(self.store.as_ref()).await {
            warn!("Failed to persist sync state for '{}': {}", self.collection, e);
        }

        let records = self.store.get_all(&self.collection).await;
        self.snapshot.send_modify(|snap| {
            if let Ok(records) = &records {
                snap.records = records.clone();
            }
            snap.loading = false;
            snap.is_syncing = false;
            snap.error = Some(message.clone());
            snap.phase = SyncPhase::Error;
        });

        Ok(SyncResult {
            collection: self.collection.clone(),
            outcome: SyncOutcome::Failed { error: message },
            records: records?,
            duration: start.elapsed(),
        })
    }

    async fn skipped(&self, reason: SkipReason, start: Instant) -> Result<SyncResult> {
        if reason != SkipReason::InFlight {
            self.snapshot.send_if_modified(|snap| {
                let changed = snap.loading;
                snap.loading = false;
                changed
            });
        }

        Ok(SyncResult {
            collection: self.collection.clone(),
            outcome: SyncOutcome::Skipped { reason },
            records: self.store.get_all(&self.collection).await?,
            duration: start.elapsed(),
        })
    }
}

/// A consumer's view of a mounted collection.
///
/// Dropping the handle stops its periodic refresh.
pub struct CollectionHandle {
    engine: Arc<SyncEngine>,
    receiver: watch::Receiver<CollectionSnapshot>,
    scheduler: SyncScheduler,
}

impl CollectionHandle {
    /// The latest published snapshot.
    pub fn snapshot(&self) -> CollectionSnapshot {
        self.receiver.borrow().clone()
    }

    /// A receiver that is notified on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<CollectionSnapshot> {
        self.receiver.clone()
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Force a refresh.
    pub async fn refresh(&self) -> Result<SyncResult> {
        self.engine.force_sync().await
    }

    /// Whether the periodic refresh is armed.
    pub fn is_scheduled(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Stop the periodic refresh and wait for it to finish.
    pub async fn dispose(self) {
        self.scheduler.shutdown().await;
    }
}
