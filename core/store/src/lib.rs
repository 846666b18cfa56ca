//! Persistent record store for carecache.
//!
//! This module provides a trait-based interface over named collections of
//! JSON records plus a reserved bookkeeping table, with an in-memory backend
//! for tests and a SQLite backend for durable local caching.
//!
//! # Design Principles
//! - Lazy schema: the first operation touching a collection creates it
//! - Async operations: all I/O operations are async
//! - Unified error semantics: every backend fault is `Error::Storage`

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::RecordStore;
