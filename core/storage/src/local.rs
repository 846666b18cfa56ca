//! Local filesystem blob storage.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use url::Url;

use carecache_common::{Error, Result};

use crate::provider::{BlobStorage, ObjectPath};

/// Local filesystem blob storage.
///
/// Stores objects under a root directory. URLs point below `public_base`
/// when one is configured (a static file server in front of the root),
/// otherwise they are `file://` URLs.
pub struct LocalBlobStorage {
    root: PathBuf,
    public_base: Option<Url>,
}

impl LocalBlobStorage {
    /// Create a new local storage with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self {
            root,
            public_base: None,
        })
    }

    /// Serve URLs from `base` instead of `file://`.
    pub fn with_public_base(mut self, base: &str) -> Result<Self> {
        let mut base = Url::parse(base)
            .map_err(|e| Error::InvalidInput(format!("Invalid public base URL: {}", e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        self.public_base = Some(base);
        Ok(self)
    }

    /// Convert an ObjectPath to a filesystem path.
    fn to_fs_path(&self, path: &ObjectPath) -> PathBuf {
        let mut fs_path = self.root.clone();
        for component in path.components() {
            fs_path.push(component);
        }
        fs_path
    }
}

#[async_trait]
impl BlobStorage for LocalBlobStorage {
    fn name(&self) -> &str {
        "local"
    }

    async fn transfer(
        &self,
        path: &ObjectPath,
        data: Vec<u8>,
        _content_type: Option<&str>,
    ) -> Result<String> {
        let fs_path = self.to_fs_path(path);

        if let Some(parent) = fs_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&fs_path, &data).await?;

        debug!("Stored {} bytes at {}", data.len(), fs_path.display());
        Ok(self.public_url(path))
    }

    fn public_url(&self, path: &ObjectPath) -> String {
        match &self.public_base {
            Some(base) => base
                .join(&path.as_key())
                .map(|u| u.to_string())
                .unwrap_or_else(|_| format!("{}{}", base, path.as_key())),
            None => {
                let fs_path = self.to_fs_path(path);
                Url::from_file_path(&fs_path)
                    .map(|u| u.to_string())
                    .unwrap_or_else(|_| fs_path.display().to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_transfer_creates_nested_dirs() {
        let temp = TempDir::new().unwrap();
        let storage = LocalBlobStorage::new(temp.path()).unwrap();
        let path = ObjectPath::parse("t1/gallery/room.jpg").unwrap();

        let url = storage.transfer(&path, b"jpeg".to_vec(), None).await.unwrap();

        let written = std::fs::read(temp.path().join("t1/gallery/room.jpg")).unwrap();
        assert_eq!(written, b"jpeg");
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("t1/gallery/room.jpg"));
    }

    #[tokio::test]
    async fn test_public_base_urls() {
        let temp = TempDir::new().unwrap();
        let storage = LocalBlobStorage::new(temp.path())
            .unwrap()
            .with_public_base("https://cdn.example.com/uploads")
            .unwrap();
        let path = ObjectPath::parse("t1/avatar/me.png").unwrap();

        assert_eq!(
            storage.public_url(&path),
            "https://cdn.example.com/uploads/t1/avatar/me.png"
        );
    }

    #[test]
    fn test_invalid_public_base() {
        let temp = TempDir::new().unwrap();
        let result = LocalBlobStorage::new(temp.path())
            .unwrap()
            .with_public_base("not a url");
        assert!(result.is_err());
    }
}
