//! Caching strategies.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use carecache_common::{Error, Result};

use crate::cache::CachePartition;
use crate::network::Network;
use crate::request::{Request, Response};

/// How a matched request is answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Strategy {
    /// Serve from cache; fetch only on a miss.
    CacheFirst,
    /// Serve from cache and refresh it in the background.
    StaleWhileRevalidate,
    /// Prefer the network; fall back to cache on failure or timeout.
    NetworkFirst {
        #[serde(default)]
        timeout: Option<Duration>,
    },
}

impl Strategy {
    pub fn network_first(timeout: Duration) -> Self {
        Strategy::NetworkFirst {
            timeout: Some(timeout),
        }
    }

    /// Answer `request` using `partition` and `network`.
    pub async fn handle(
        &self,
        request: &Request,
        partition: &Arc<CachePartition>,
        network: &Arc<dyn Network>,
    ) -> Result<Response> {
        match self {
            Strategy::CacheFirst => cache_first(request, partition, network).await,
            Strategy::StaleWhileRevalidate => {
                stale_while_revalidate(request, partition, network).await
            }
            Strategy::NetworkFirst { timeout } => {
                network_first(request, partition, network, *timeout).await
            }
        }
    }
}

fn store_if_cacheable(partition: &CachePartition, signature: &str, response: &Response) {
    if response.is_cacheable() {
        partition.put(signature, response.clone());
    } else {
        debug!(
            "Not caching status {} for {} in '{}'",
            response.status,
            signature,
            partition.name()
        );
    }
}

async fn cache_first(
    request: &Request,
    partition: &Arc<CachePartition>,
    network: &Arc<dyn Network>,
) -> Result<Response> {
    let signature = request.signature();
    if let Some(cached) = partition.get(&signature) {
        debug!("Cache hit in '{}': {}", partition.name(), signature);
        return Ok(cached);
    }

    let response = network.fetch(request).await?;
    store_if_cacheable(partition, &signature, &response);
    Ok(response)
}

async fn stale_while_revalidate(
    request: &Request,
    partition: &Arc<CachePartition>,
    network: &Arc<dyn Network>,
) -> Result<Response> {
    let signature = request.signature();
    let Some(cached) = partition.get(&signature) else {
        let response = network.fetch(request).await?;
        store_if_cacheable(partition, &signature, &response);
        return Ok(response);
    };

    let (request, partition, network) = (request.clone(), Arc::clone(partition), Arc::clone(network));
    tokio::spawn(async move {
        match network.fetch(&request).await {
            Ok(fresh) => store_if_cacheable(&partition, &signature, &fresh),
            Err(e) => debug!("Background refresh of {} failed: {}", signature, e),
        }
    });

    Ok(cached)
}

async fn network_first(
    request: &Request,
    partition: &Arc<CachePartition>,
    network: &Arc<dyn Network>,
    timeout: Option<Duration>,
) -> Result<Response> {
    let signature = request.signature();

    let outcome = match timeout {
        Some(limit) => tokio::time::timeout(limit, network.fetch(request))
            .await
            .unwrap_or_else(|_| {
                Err(Error::Timeout(format!(
                    "{} exceeded {:?}",
                    request.url, limit
                )))
            }),
        None => network.fetch(request).await,
    };

    match outcome {
        Ok(response) => {
            store_if_cacheable(partition, &signature, &response);
            Ok(response)
        }
        Err(e) => match partition.get(&signature) {
            Some(cached) => {
                warn!("Serving cached {} after: {}", signature, e);
                Ok(cached)
            }
            None => Err(e),
        },
    }
}
