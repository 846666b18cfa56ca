//! Blob storage trait definition.

use async_trait::async_trait;
use std::fmt;

use carecache_common::{Error, Result};

/// Key of an object inside a storage bucket, e.g. `t42/avatar/me.png`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectPath {
    components: Vec<String>,
}

impl ObjectPath {
    /// Create a path from string components.
    ///
    /// # Postconditions
    /// - Every component is a plain, non-empty segment
    ///
    /// # Errors
    /// - No components
    /// - A component is empty, `.`/`..`, or contains a separator
    pub fn from_components(components: Vec<String>) -> Result<Self> {
        if components.is_empty() {
            return Err(Error::InvalidInput("Object path cannot be empty".to_string()));
        }
        for comp in &components {
            if comp.is_empty() || comp == "." || comp == ".." {
                return Err(Error::InvalidInput(format!(
                    "Invalid object path component '{}'",
                    comp
                )));
            }
            if comp.contains('/') || comp.contains('\\') {
                return Err(Error::InvalidInput(
                    "Object path component cannot contain separators".to_string(),
                ));
            }
        }
        Ok(Self { components })
    }

    /// Parse a `/`-separated key.
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.trim_matches('/');
        Self::from_components(trimmed.split('/').map(String::from).collect())
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Last component.
    pub fn file_name(&self) -> &str {
        self.components.last().map(|s| s.as_str()).unwrap_or_default()
    }

    /// Key form without a leading slash.
    pub fn as_key(&self) -> String {
        self.components.join("/")
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_key())
    }
}

/// Storage transfer collaborator.
///
/// Implementations own authentication and the actual byte transfer. Writes
/// are upserts: transferring to an existing path replaces the object.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Get the backend name (e.g., "memory", "local", "http").
    fn name(&self) -> &str;

    /// Store `data` at `path` and return its public URL.
    ///
    /// # Preconditions
    /// - `data` is the complete content to store
    ///
    /// # Postconditions
    /// - Object is created or replaced at `path`
    /// - Returned URL equals `public_url(path)`
    ///
    /// # Errors
    /// - Network/I/O errors, with the backend's message
    async fn transfer(
        &self,
        path: &ObjectPath,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<String>;

    /// Public URL an object at `path` is (or would be) served from.
    fn public_url(&self, path: &ObjectPath) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_path_parse() {
        let path = ObjectPath::parse("/t1/avatar/me.png").unwrap();
        assert_eq!(path.components(), &["t1", "avatar", "me.png"]);
        assert_eq!(path.as_key(), "t1/avatar/me.png");
        assert_eq!(path.file_name(), "me.png");
    }

    #[test]
    fn test_object_path_rejects_traversal() {
        assert!(ObjectPath::parse("").is_err());
        assert!(ObjectPath::parse("a/../b").is_err());
        assert!(ObjectPath::parse("a//b").is_err());
        assert!(ObjectPath::from_components(vec!["a\\b".to_string()]).is_err());
    }
}
