//! Blob storage and connectivity-gated uploads for carecache.
//!
//! This module provides a trait-based interface for the storage transfer
//! collaborator (in-memory, local directory, remote object storage), a
//! registry for resolving one by name, and the upload gate that refuses
//! transfers while offline.
//!
//! # Design Principles
//! - Provider isolation: no backend-specific logic in the upload gate
//! - Deterministic object paths: retried uploads land on the same object
//! - Unified error semantics: collaborator messages reach callers verbatim

pub mod http;
pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;
pub mod upload;

pub use http::{HttpBlobConfig, HttpBlobStorage};
pub use local::LocalBlobStorage;
pub use memory::MemoryBlobStorage;
pub use provider::{BlobStorage, ObjectPath};
pub use registry::{create_default_registry, StorageFactory, StorageRegistry};
pub use upload::{UploadConfig, UploadFile, UploadGate, UploadProgress};
