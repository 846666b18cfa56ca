//! Carecache sync engine
//!
//! Keeps local collections fresh against their remote owners:
//! - Local-first mount: cached records are published before any network call
//! - Staleness-gated refreshes with a single sync in flight per collection
//! - Periodic refresh that only runs while the device is online
//! - Retry strategy with exponential backoff for transient fetch failures

pub mod engine;
pub mod manager;
pub mod remote;
pub mod retry;
pub mod scheduler;
pub mod state;

pub use engine::{Clock, CollectionHandle, SyncConfig, SyncEngine};
pub use manager::SyncManager;
pub use remote::{records_from_json, FnSource, HttpRemoteSource, RemoteSource};
pub use retry::{RetryConfig, RetryExecutor};
pub use scheduler::{SkipReason, SyncOutcome, SyncResult, SyncScheduler, SyncTrigger};
pub use state::{CollectionSnapshot, SyncPhase, SyncState};
