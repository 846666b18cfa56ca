//! In-memory blob storage for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use carecache_common::Result;

use crate::provider::{BlobStorage, ObjectPath};

/// Stored object.
#[derive(Debug, Clone)]
struct Object {
    data: Vec<u8>,
    content_type: Option<String>,
}

/// In-memory blob storage.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop.
pub struct MemoryBlobStorage {
    objects: Arc<RwLock<HashMap<String, Object>>>,
    transfers: AtomicUsize,
}

impl MemoryBlobStorage {
    /// Create a new empty memory storage.
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            transfers: AtomicUsize::new(0),
        }
    }

    /// Bytes stored at `path`, if any.
    pub fn get(&self, path: &ObjectPath) -> Option<Vec<u8>> {
        self.objects
            .read()
            .unwrap()
            .get(&path.as_key())
            .map(|o| o.data.clone())
    }

    /// Content type recorded for `path`, if any.
    pub fn content_type(&self, path: &ObjectPath) -> Option<String> {
        self.objects
            .read()
            .unwrap()
            .get(&path.as_key())
            .and_then(|o| o.content_type.clone())
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of transfers performed, including overwrites.
    pub fn transfer_count(&self) -> usize {
        self.transfers.load(Ordering::SeqCst)
    }
}

impl Default for MemoryBlobStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStorage for MemoryBlobStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn transfer(
        &self,
        path: &ObjectPath,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<String> {
        self.transfers.fetch_add(1, Ordering::SeqCst);
        self.objects.write().unwrap().insert(
            path.as_key(),
            Object {
                data,
                content_type: content_type.map(String::from),
            },
        );
        Ok(self.public_url(path))
    }

    fn public_url(&self, path: &ObjectPath) -> String {
        format!("memory://{}", path.as_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transfer_and_overwrite() {
        let storage = MemoryBlobStorage::new();
        let path = ObjectPath::parse("t1/avatar/me.png").unwrap();

        let url = storage
            .transfer(&path, b"v1".to_vec(), Some("image/png"))
            .await
            .unwrap();
        assert_eq!(url, "memory://t1/avatar/me.png");

        storage.transfer(&path, b"v2".to_vec(), None).await.unwrap();
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.transfer_count(), 2);
        assert_eq!(storage.get(&path), Some(b"v2".to_vec()));
        assert!(storage.content_type(&path).is_none());
    }
}
