//! Connectivity-gated uploads.
//!
//! The gate is a hard precondition, not a queue: while the connectivity
//! monitor reports offline every upload is refused and nothing is retried
//! later on the caller's behalf.

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use carecache_common::{ConnectivityMonitor, Error, Result};

use crate::provider::{BlobStorage, ObjectPath};

/// Upload limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Largest accepted payload in bytes.
    pub max_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024,
        }
    }
}

impl UploadConfig {
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }
}

/// A file handed to the gate.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            data,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Read a file from disk, guessing its content type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::InvalidInput(format!("Not a file path: {}", path.display())))?
            .to_string();
        let data = tokio::fs::read(path).await?;

        let content_type = guess_content_type(&file_name).map(String::from);
        Ok(Self {
            file_name,
            content_type,
            data,
        })
    }
}

fn guess_content_type(file_name: &str) -> Option<&'static str> {
    let ext = file_name.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "svg" => Some("image/svg+xml"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}

/// Coarse upload progress, published on a watch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadProgress {
    Idle,
    Preparing,
    Transferring,
    Completed { url: String },
    Failed { message: String },
}

impl UploadProgress {
    /// Rough completion percentage for progress bars.
    pub fn percent(&self) -> u8 {
        match self {
            UploadProgress::Idle => 0,
            UploadProgress::Preparing => 10,
            UploadProgress::Transferring => 50,
            UploadProgress::Completed { .. } => 100,
            UploadProgress::Failed { .. } => 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            UploadProgress::Completed { .. } | UploadProgress::Failed { .. }
        )
    }
}

/// Make a file name safe for use as an object key.
///
/// Lowercases, keeps `[a-z0-9._-]`, percent-encodes non-ASCII characters
/// and collapses every other run of ASCII characters into a single `-`.
/// The extension is sanitised separately. A literal `%` never survives, so
/// names in different scripts keep distinct keys.
pub fn sanitize_file_name(name: &str) -> String {
    fn clean(part: &str) -> String {
        let mut out = String::with_capacity(part.len());
        let mut pending_dash = false;
        for c in part.chars().flat_map(|c| c.to_lowercase()) {
            let keep = c.is_ascii_alphanumeric() || c == '_' || c == '-';
            if keep || !c.is_ascii() {
                if pending_dash && !out.is_empty() {
                    out.push('-');
                }
                pending_dash = false;
                if keep {
                    out.push(c);
                } else {
                    let mut buf = [0u8; 4];
                    out.extend(utf8_percent_encode(c.encode_utf8(&mut buf), NON_ALPHANUMERIC));
                }
            } else {
                pending_dash = true;
            }
        }
        out.trim_matches('-').to_string()
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };

    let stem = stem
        .split('.')
        .map(clean)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(".");
    let stem = if stem.is_empty() { "file".to_string() } else { stem };

    match ext.map(clean).filter(|e| !e.is_empty()) {
        Some(ext) => format!("{}.{}", stem, ext),
        None => stem,
    }
}

/// Storage key for a logical file: `{owner}/{category}/{file}`.
///
/// The same inputs always give the same key, so a retried upload replaces
/// the object it already wrote instead of creating a second one.
pub fn storage_path(owner_id: &str, category: &str, file_name: &str) -> Result<ObjectPath> {
    if owner_id.trim().is_empty() {
        return Err(Error::InvalidInput("Owner id cannot be empty".to_string()));
    }
    if category.trim().is_empty() {
        return Err(Error::InvalidInput("Upload category cannot be empty".to_string()));
    }
    ObjectPath::from_components(vec![
        owner_id.to_string(),
        category.to_string(),
        sanitize_file_name(file_name),
    ])
}

/// Connectivity-gated upload pipeline.
pub struct UploadGate {
    storage: Arc<dyn BlobStorage>,
    connectivity: Arc<ConnectivityMonitor>,
    config: UploadConfig,
    progress: watch::Sender<UploadProgress>,
}

impl UploadGate {
    pub fn new(
        storage: Arc<dyn BlobStorage>,
        connectivity: Arc<ConnectivityMonitor>,
        config: UploadConfig,
    ) -> Self {
        let (progress, _) = watch::channel(UploadProgress::Idle);
        Self {
            storage,
            connectivity,
            config,
            progress,
        }
    }

    /// Subscribe to progress transitions.
    pub fn progress(&self) -> watch::Receiver<UploadProgress> {
        self.progress.subscribe()
    }

    fn fail(&self, error: Error) -> Error {
        let message = match &error {
            Error::Network(m) | Error::Storage(m) | Error::Offline(m) => m.clone(),
            other => other.to_string(),
        };
        self.progress.send_replace(UploadProgress::Failed { message });
        error
    }

    /// Upload `file` for `owner_id` under `category` and return its URL.
    ///
    /// # Errors
    /// - `Error::Offline` when the device is offline; storage is untouched
    /// - `Error::InvalidInput` for empty/oversized files or bad owner/category
    /// - The storage collaborator's error, unchanged
    pub async fn upload(&self, file: UploadFile, owner_id: &str, category: &str) -> Result<String> {
        if self.connectivity.is_offline() {
            warn!("Refusing upload of '{}' while offline", file.file_name);
            return Err(self.fail(Error::Offline(
                "Uploads are unavailable while offline".to_string(),
            )));
        }

        self.progress.send_replace(UploadProgress::Preparing);

        if file.data.is_empty() {
            return Err(self.fail(Error::InvalidInput(format!(
                "File '{}' is empty",
                file.file_name
            ))));
        }
        if file.data.len() as u64 > self.config.max_bytes {
            return Err(self.fail(Error::InvalidInput(format!(
                "File '{}' is {} bytes, limit is {}",
                file.file_name,
                file.data.len(),
                self.config.max_bytes
            ))));
        }

        let path = storage_path(owner_id, category, &file.file_name).map_err(|e| self.fail(e))?;

        self.progress.send_replace(UploadProgress::Transferring);
        let size = file.data.len();
        match self
            .storage
            .transfer(&path, file.data, file.content_type.as_deref())
            .await
        {
            Ok(url) => {
                info!("Uploaded {} bytes to {} via {}", size, path, self.storage.name());
                self.progress
                    .send_replace(UploadProgress::Completed { url: url.clone() });
                Ok(url)
            }
            Err(e) => {
                warn!("Upload to {} failed: {}", path, e);
                Err(self.fail(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBlobStorage;
    use async_trait::async_trait;
    use carecache_common::Connectivity;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RejectingStorage {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BlobStorage for RejectingStorage {
        fn name(&self) -> &str {
            "rejecting"
        }

        async fn transfer(
            &self,
            _path: &ObjectPath,
            _data: Vec<u8>,
            _content_type: Option<&str>,
        ) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Network("The resource already exists".to_string()))
        }

        fn public_url(&self, path: &ObjectPath) -> String {
            path.as_key()
        }
    }

    fn gate(storage: Arc<dyn BlobStorage>, connectivity: Arc<ConnectivityMonitor>) -> UploadGate {
        UploadGate::new(storage, connectivity, UploadConfig::default().with_max_bytes(16))
    }

    #[tokio::test]
    async fn test_offline_refusal_skips_transfer() {
        let storage = Arc::new(MemoryBlobStorage::new());
        let gate = gate(storage.clone(), Arc::new(ConnectivityMonitor::offline()));

        let result = gate
            .upload(UploadFile::new("me.png", vec![1]), "t1", "avatar")
            .await;

        assert!(matches!(result, Err(Error::Offline(_))));
        assert_eq!(storage.transfer_count(), 0);
        assert!(matches!(*gate.progress().borrow(), UploadProgress::Failed { .. }));
    }

    #[tokio::test]
    async fn test_upload_resolves_url_and_reports_completion() {
        let storage = Arc::new(MemoryBlobStorage::new());
        let gate = gate(storage.clone(), Arc::new(ConnectivityMonitor::online()));

        let url = gate
            .upload(
                UploadFile::new("My Photo.PNG", vec![1, 2, 3]).with_content_type("image/png"),
                "t1",
                "avatar",
            )
            .await
            .unwrap();

        assert_eq!(url, "memory://t1/avatar/my-photo.png");
        let path = ObjectPath::parse("t1/avatar/my-photo.png").unwrap();
        assert_eq!(storage.get(&path), Some(vec![1, 2, 3]));
        assert_eq!(storage.content_type(&path).as_deref(), Some("image/png"));
        assert_eq!(
            *gate.progress().borrow(),
            UploadProgress::Completed { url: url.clone() }
        );
    }

    #[tokio::test]
    async fn test_retried_upload_is_idempotent() {
        let storage = Arc::new(MemoryBlobStorage::new());
        let gate = gate(storage.clone(), Arc::new(ConnectivityMonitor::online()));

        let first = gate
            .upload(UploadFile::new("cert.pdf", vec![1]), "t1", "documents")
            .await
            .unwrap();
        let second = gate
            .upload(UploadFile::new("cert.pdf", vec![1]), "t1", "documents")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_gate_follows_connectivity_changes() {
        let storage = Arc::new(MemoryBlobStorage::new());
        let connectivity = Arc::new(ConnectivityMonitor::online());
        let gate = gate(storage.clone(), connectivity.clone());

        connectivity.report(Connectivity::Offline);
        assert!(gate
            .upload(UploadFile::new("a.png", vec![1]), "t1", "avatar")
            .await
            .is_err());

        connectivity.report(Connectivity::Online);
        assert!(gate
            .upload(UploadFile::new("a.png", vec![1]), "t1", "avatar")
            .await
            .is_ok());
        assert_eq!(storage.transfer_count(), 1);
    }

    #[tokio::test]
    async fn test_collaborator_error_is_verbatim() {
        let storage = Arc::new(RejectingStorage {
            calls: AtomicUsize::new(0),
        });
        let gate = gate(storage.clone(), Arc::new(ConnectivityMonitor::online()));

        let err = gate
            .upload(UploadFile::new("a.png", vec![1]), "t1", "avatar")
            .await
            .unwrap_err();

        match err {
            Error::Network(message) => assert_eq!(message, "The resource already exists"),
            other => panic!("unexpected error: {other:?}"),
        }
        // No automatic retry.
        assert_eq!(storage.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            *gate.progress().borrow(),
            UploadProgress::Failed {
                message: "The resource already exists".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_rejects_invalid_input() {
        let storage = Arc::new(MemoryBlobStorage::new());
        let gate = gate(storage.clone(), Arc::new(ConnectivityMonitor::online()));

        let empty = gate.upload(UploadFile::new("a.png", vec![]), "t1", "avatar").await;
        assert!(matches!(empty, Err(Error::InvalidInput(_))));

        let big = gate
            .upload(UploadFile::new("a.png", vec![0; 17]), "t1", "avatar")
            .await;
        assert!(matches!(big, Err(Error::InvalidInput(_))));

        let owner = gate.upload(UploadFile::new("a.png", vec![1]), "", "avatar").await;
        assert!(matches!(owner, Err(Error::InvalidInput(_))));

        let category = gate
            .upload(UploadFile::new("a.png", vec![1]), "t1", "a/b")
            .await;
        assert!(matches!(category, Err(Error::InvalidInput(_))));

        assert_eq!(storage.transfer_count(), 0);
    }

    #[tokio::test]
    async fn test_from_path_guesses_content_type() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("Portrait.JPG");
        std::fs::write(&path, b"jpeg").unwrap();

        let file = UploadFile::from_path(&path).await.unwrap();
        assert_eq!(file.file_name, "Portrait.JPG");
        assert_eq!(file.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(file.data, b"jpeg");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("My Photo (1).PNG"), "my-photo-1.png");
        assert_eq!(sanitize_file_name("report.final.pdf"), "report.final.pdf");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "file.etc-passwd");
        assert_eq!(sanitize_file_name("???"), "file");
        assert_eq!(sanitize_file_name(".env"), "env");
        assert_eq!(sanitize_file_name("Ärztin.jpg"), "%C3%A4rztin.jpg");
        assert_eq!(sanitize_file_name("100%.txt"), "100.txt");
    }

    #[tokio::test]
    async fn test_non_latin_names_keep_distinct_paths() {
        let cyrillic = storage_path("t1", "documents", "диплом.pdf").unwrap();
        let chinese = storage_path("t1", "documents", "證書.pdf").unwrap();
        assert_ne!(cyrillic, chinese);
        assert_eq!(
            cyrillic.file_name(),
            "%D0%B4%D0%B8%D0%BF%D0%BB%D0%BE%D0%BC.pdf"
        );

        let storage = Arc::new(MemoryBlobStorage::new());
        let gate = UploadGate::new(
            storage.clone(),
            Arc::new(ConnectivityMonitor::online()),
            UploadConfig::default(),
        );
        let first = gate
            .upload(UploadFile::new("диплом.pdf", b"one".to_vec()), "t1", "documents")
            .await
            .unwrap();
        let second = gate
            .upload(UploadFile::new("證書.pdf", b"two".to_vec()), "t1", "documents")
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(UploadProgress::Idle.percent(), 0);
        assert_eq!(UploadProgress::Preparing.percent(), 10);
        assert!(UploadProgress::Completed { url: String::new() }.is_finished());
        assert!(!UploadProgress::Transferring.is_finished());
    }

    proptest! {
        #[test]
        fn prop_storage_path_is_deterministic_and_flat(
            owner in "[a-z0-9]{1,12}",
            category in "[a-z]{1,10}",
            name in "\\PC{0,40}",
        ) {
            let a = storage_path(&owner, &category, &name).unwrap();
            let b = storage_path(&owner, &category, &name).unwrap();
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.components().len(), 3);
            prop_assert!(!a.file_name().contains('/'));
            prop_assert!(!a.file_name().is_empty());
            prop_assert!(a.file_name() != "." && a.file_name() != "..");
        }
    }
}
