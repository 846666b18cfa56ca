//! The request router: route table, caches and offline fallback.

use http::Method;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use carecache_common::{Error, Result};

use crate::cache::{CacheStorage, ExpirationPolicy};
use crate::network::Network;
use crate::request::{Request, Response};
use crate::route::{default_routes, match_route, Route};

/// Partition holding install-time assets.
pub const PRECACHE_PARTITION: &str = "precache";

const DEFAULT_OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Offline</title>
</head>
<body>
<h1>You are offline</h1>
<p>This page is not available without a connection. Pages you have already
visited are still available. Try again once you are back online.</p>
</body>
</html>
"#;

/// Page served for navigations that fail with nothing cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfflineDocument {
    /// Path the document is precached under, e.g. `/offline.html`.
    pub path: String,
    pub html: String,
}

impl Default for OfflineDocument {
    fn default() -> Self {
        Self {
            path: "/offline.html".to_string(),
            html: DEFAULT_OFFLINE_PAGE.to_string(),
        }
    }
}

impl OfflineDocument {
    /// Load the page from a file.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let html = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(Self {
            html,
            ..Self::default()
        })
    }
}

/// Router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Label used in logs and status output.
    pub version: String,
    pub routes: Vec<Route>,
    pub offline: OfflineDocument,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_string(),
            routes: Self::default_routes(),
            offline: OfflineDocument::default(),
        }
    }
}

impl RouterConfig {
    /// The stock route table.
    pub fn default_routes() -> Vec<Route> {
        default_routes()
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_routes(mut self, routes: Vec<Route>) -> Self {
        self.routes = routes;
        self
    }

    pub fn with_offline(mut self, offline: OfflineDocument) -> Self {
        self.offline = offline;
        self
    }
}

/// Decides, per request, between network and cache.
pub struct RequestRouter {
    id: Uuid,
    config: RouterConfig,
    cache: Arc<CacheStorage>,
    network: Arc<dyn Network>,
}

impl RequestRouter {
    pub fn new(config: RouterConfig, cache: Arc<CacheStorage>, network: Arc<dyn Network>) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            cache,
            network,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<CacheStorage> {
        &self.cache
    }

    pub fn network(&self) -> &Arc<dyn Network> {
        &self.network
    }

    /// Prepare caches before this router can take over.
    ///
    /// # Errors
    /// - A route names an empty partition
    pub async fn install(&self) -> Result<()> {
        if let Some(route) = self.config.routes.iter().find(|r| r.partition.is_empty()) {
            return Err(Error::InvalidInput(format!(
                "Route {:?} has no cache partition",
                route.matcher
            )));
        }

        let precache = self
            .cache
            .open(PRECACHE_PARTITION, &ExpirationPolicy::none());
        precache.put(
            self.config.offline.path.clone(),
            Response::html(self.config.offline.html.clone()),
        );

        info!(
            "Installed router {} ({} routes)",
            self.config.version,
            self.config.routes.len()
        );
        Ok(())
    }

    /// The precached offline page.
    pub fn offline_response(&self) -> Response {
        self.cache
            .get(PRECACHE_PARTITION)
            .and_then(|p| p.get(&self.config.offline.path))
            .unwrap_or_else(|| Response::html(self.config.offline.html.clone()))
    }

    /// Answer one intercepted request.
    pub async fn handle(&self, request: &Request) -> Result<Response> {
        if request.method != Method::GET {
            return self.network.fetch(request).await;
        }

        let Some(route) = match_route(&self.config.routes, request) else {
            debug!("No route for {}", request.url);
            return self.network.fetch(request).await;
        };

        let partition = self.cache.open(&route.partition, &route.expiration);
        match route.strategy.handle(request, &partition, &self.network).await {
            Ok(response) => Ok(response),
            Err(e) if request.is_navigation() => {
                warn!("Serving offline page for {}: {}", request.url, e);
                Ok(self.offline_response())
            }
            Err(e) => Err(e),
        }
    }
}
