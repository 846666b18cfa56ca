//! Sync scheduling - triggers, outcomes and the periodic refresh loop.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use carecache_common::{CollectionName, Connectivity, Record};

use crate::engine::SyncEngine;

/// What started a sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTrigger {
    /// A consumer mounted a collection with empty or stale data.
    Mount,
    /// An explicit, non-forced request.
    Manual,
    /// The periodic timer fired.
    Periodic,
    /// Connectivity came back.
    Reconnect,
    /// An explicit refresh that ignores connectivity and staleness.
    Forced,
}

impl SyncTrigger {
    /// Whether this trigger is skipped while offline.
    pub fn respects_offline(self) -> bool {
        !matches!(self, SyncTrigger::Forced)
    }

    /// Whether this trigger is skipped while local data is fresh.
    pub fn respects_staleness(self) -> bool {
        matches!(self, SyncTrigger::Manual | SyncTrigger::Reconnect)
    }
}

/// Why a sync did not reach the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Offline,
    Fresh,
    InFlight,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SyncOutcome {
    /// Remote data replaced the local copy.
    Synced { records: usize },
    Skipped { reason: SkipReason },
    /// The remote could not be read; local data was left in place.
    Failed { error: String },
}

/// Sync result from the engine.
///
/// `records` is always the local copy after the attempt, so callers get
/// usable data whether or not the network was reached.
#[derive(Debug, Clone)]
pub struct SyncResult {
    pub collection: CollectionName,
    pub outcome: SyncOutcome,
    pub records: Vec<Record>,
    pub duration: Duration,
}

impl SyncResult {
    pub fn is_synced(&self) -> bool {
        matches!(self.outcome, SyncOutcome::Synced { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, SyncOutcome::Failed { .. })
    }
}

/// Periodic refresh for one mounted collection.
///
/// The timer only exists while the device is online: going offline tears
/// it down and coming back re-arms it, attempting a refresh right away when
/// the local copy went stale in the meantime.
pub struct SyncScheduler {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SyncScheduler {
    /// Start the loop, unless the engine has periodic refresh disabled.
    pub fn spawn(engine: Arc<SyncEngine>) -> Self {
        let config = engine.config();
        if !config.periodic || config.sync_interval.is_zero() {
            debug!("Periodic refresh disabled for '{}'", engine.collection());
            return Self {
                shutdown_tx: None,
                task: None,
            };
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let connectivity = engine.connectivity().watch();
        let task = tokio::spawn(run_loop(engine, connectivity, shutdown_rx));

        Self {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SyncScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn periodic_timer(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn run_loop(
    engine: Arc<SyncEngine>,
    mut connectivity: watch::Receiver<Connectivity>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let period = engine.config().sync_interval;
    let mut timer = connectivity
        .borrow_and_update()
        .is_online()
        .then(|| periodic_timer(period));

    info!(
        "Periodic refresh of '{}' every {:?}",
        engine.collection(),
        period
    );

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("Periodic refresh of '{}' stopped", engine.collection());
                break;
            }
            changed = connectivity.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = connectivity.borrow_and_update().is_online();
                if online && timer.is_none() {
                    debug!("Re-arming refresh timer for '{}'", engine.collection());
                    timer = Some(periodic_timer(period));
                    engine.run_logged(SyncTrigger::Reconnect).await;
                } else if !online && timer.is_some() {
                    debug!("Tearing down refresh timer for '{}'", engine.collection());
                    timer = None;
                }
            }
            _ = next_tick(&mut timer) => {
                engine.run_logged(SyncTrigger::Periodic).await;
            }
        }
    }
}
