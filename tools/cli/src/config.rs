//! CLI configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use carecache_router::Route;
use carecache_storage::UploadConfig;
use carecache_sync::{RetryConfig, SyncConfig};

/// One synced collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    /// Endpoint path under `api_base`; defaults to the collection name.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub sync_interval_secs: Option<u64>,
}

impl CollectionConfig {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: None,
            sync_interval_secs: None,
        }
    }

    pub fn endpoint_path(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.name)
    }
}

/// Which blob storage backs uploads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Registry name: `local`, `http` or `memory`.
    pub backend: String,
    /// Backend-specific options.
    #[serde(default)]
    pub options: serde_json::Value,
}

impl Default for StorageSettings {
    fn default() -> Self {
        let root = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("carecache")
            .join("uploads");
        Self {
            backend: "local".to_string(),
            options: serde_json::json!({ "root": root }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub listen: SocketAddr,
    pub upstream: Option<String>,
    /// HTML file served for failed navigations.
    pub offline_page: Option<PathBuf>,
    /// Replaces the stock route table when set.
    pub routes: Option<Vec<Route>>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8787)),
            upstream: None,
            offline_page: None,
            routes: None,
        }
    }
}

/// Top-level configuration, read from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: Option<PathBuf>,
    pub api_base: String,
    pub bearer_token: Option<String>,
    pub sync_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    pub max_retries: u32,
    pub collections: Vec<CollectionConfig>,
    pub storage: StorageSettings,
    pub upload: UploadConfig,
    pub proxy: ProxySettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: None,
            api_base: "http://localhost:3000/api".to_string(),
            bearer_token: None,
            sync_interval_secs: 5 * 60,
            fetch_timeout_secs: 30,
            max_retries: 2,
            collections: Vec::new(),
            storage: StorageSettings::default(),
            upload: UploadConfig::default(),
            proxy: ProxySettings::default(),
        }
    }
}

impl AppConfig {
    /// Default location of the config file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("carecache").join("config.json"))
    }

    /// Load from `path`, or from the default location when it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Database path: flag, then config, then the platform data dir.
    pub fn database_path(&self, flag: Option<&Path>) -> PathBuf {
        flag.map(Path::to_path_buf)
            .or_else(|| self.database.clone())
            .unwrap_or_else(|| {
                dirs::data_local_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("carecache")
                    .join("cache.db")
            })
    }

    /// Configured collection, or an ad-hoc one read from `{api_base}/{name}`.
    pub fn collection(&self, name: &str) -> CollectionConfig {
        self.collections
            .iter()
            .find(|c| c.name == name)
            .cloned()
            .unwrap_or_else(|| CollectionConfig::named(name))
    }

    pub fn sync_config(&self, collection: &CollectionConfig) -> SyncConfig {
        let interval = collection
            .sync_interval_secs
            .unwrap_or(self.sync_interval_secs);
        let timeout = (self.fetch_timeout_secs > 0)
            .then(|| Duration::from_secs(self.fetch_timeout_secs));

        SyncConfig::default()
            .with_sync_interval(Duration::from_secs(interval))
            .with_fetch_timeout(timeout)
            .with_retry(RetryConfig::new(self.max_retries))
            .with_periodic(false)
    }
}
