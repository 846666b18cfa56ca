//! Common utilities and types shared across carecache crates.
//!
//! This module provides the error taxonomy, the record/collection types that
//! every layer of the offline cache speaks, and the process-wide
//! connectivity monitor.

pub mod connectivity;
pub mod error;
pub mod types;

pub use connectivity::{Connectivity, ConnectivityMonitor, Subscription};
pub use error::{Error, Result};
pub use types::{CollectionName, Record};
