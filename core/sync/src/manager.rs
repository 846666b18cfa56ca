//! Registry of sync engines sharing one store and one connectivity monitor.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use carecache_common::{CollectionName, ConnectivityMonitor, Error, Result};
use carecache_store::RecordStore;

use crate::engine::{SyncConfig, SyncEngine};
use crate::remote::RemoteSource;
use crate::scheduler::SyncResult;
use crate::state::SyncState;

/// Owns one [`SyncEngine`] per registered collection.
pub struct SyncManager {
    store: Arc<dyn RecordStore>,
    connectivity: Arc<ConnectivityMonitor>,
    engines: RwLock<BTreeMap<CollectionName, Arc<SyncEngine>>>,
}

impl SyncManager {
    pub fn new(store: Arc<dyn RecordStore>, connectivity: Arc<ConnectivityMonitor>) -> Self {
        Self {
            store,
            connectivity,
            engines: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    /// Register a collection with its remote source.
    ///
    /// # Errors
    /// - Collection already registered
    /// - Store fault while restoring sync state
    pub async fn register(
        &self,
        collection: CollectionName,
        source: Arc<dyn RemoteSource>,
        config: SyncConfig,
    ) -> Result<Arc<SyncEngine>> {
        let mut engines = self.engines.write().await;
        if engines.contains_key(&collection) {
            return Err(Error::AlreadyExists(format!(
                "Collection '{}' is already registered",
                collection
            )));
        }

        let engine = Arc::new(
            SyncEngine::new(
                collection.clone(),
                Arc::clone(&self.store),
                source,
                Arc::clone(&self.connectivity),
                config,
            )
            .await?,
        );
        engines.insert(collection.clone(), Arc::clone(&engine));
        info!("Registered collection '{}'", collection);
        Ok(engine)
    }

    /// Engine for a registered collection.
    pub async fn engine(&self, collection: &CollectionName) -> Result<Arc<SyncEngine>> {
        self.engines
            .read()
            .await
            .get(collection)
            .cloned()
            .ok_or_else(|| {
                Error::NotFound(format!("Collection '{}' is not registered", collection))
            })
    }

    /// Registered collection names, sorted.
    pub async fn collections(&self) -> Vec<CollectionName> {
        self.engines.read().await.keys().cloned().collect()
    }

    async fn all_engines(&self) -> Vec<Arc<SyncEngine>> {
        self.engines.read().await.values().cloned().collect()
    }

    /// Sync every collection concurrently, honoring staleness.
    pub async fn sync_all(&self) -> Vec<(CollectionName, Result<SyncResult>)> {
        let engines = self.all_engines().await;
        join_all(engines.iter().map(|engine| async move {
            (engine.collection().clone(), engine.sync().await)
        }))
        .await
    }

    /// Force a refresh of every collection concurrently.
    pub async fn force_sync_all(&self) -> Vec<(CollectionName, Result<SyncResult>)> {
        let engines = self.all_engines().await;
        join_all(engines.iter().map(|engine| async move {
            (engine.collection().clone(), engine.force_sync().await)
        }))
        .await
    }

    /// Sync state of every collection.
    pub async fn states(&self) -> Vec<SyncState> {
        let engines = self.all_engines().await;
        join_all(engines.iter().map(|engine| engine.state())).await
    }

    /// Drop local records and sync state of one collection.
    pub async fn reset(&self, collection: &CollectionName) -> Result<()> {
        self.engine(collection).await?.reset().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::FnSource;
    use crate::retry::RetryConfig;
    use crate::scheduler::SyncOutcome;
    use carecache_common::Record;
    use carecache_store::MemoryStore;
    use serde_json::json;

    fn source(ids: &'static [&'static str]) -> Arc<dyn RemoteSource> {
        Arc::new(FnSource::new(move || async move {
            ids.iter()
                .map(|id| Record::from_value(json!({ "id": id })))
                .collect::<Result<Vec<_>>>()
        }))
    }

    fn config() -> SyncConfig {
        SyncConfig::default()
            .with_periodic(false)
            .with_retry(RetryConfig::none())
    }

    fn manager() -> SyncManager {
        SyncManager::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ConnectivityMonitor::online()),
        )
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let manager = manager();
        let therapists = CollectionName::new("therapists").unwrap();

        manager
            .register(therapists.clone(), source(&["t1"]), config())
            .await
            .unwrap();

        assert!(manager.engine(&therapists).await.is_ok());
        let result = manager
            .register(therapists.clone(), source(&["t1"]), config())
            .await;
        assert!(matches!(result, Err(Error::AlreadyExists(_))));

        let missing = CollectionName::new("patients").unwrap();
        assert!(matches!(
            manager.engine(&missing).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_all_is_independent_per_collection() {
        let manager = manager();
        let therapists = CollectionName::new("therapists").unwrap();
        let reviews = CollectionName::new("reviews").unwrap();

        manager
            .register(therapists.clone(), source(&["t1", "t2"]), config())
            .await
            .unwrap();
        let failing: Arc<dyn RemoteSource> = Arc::new(FnSource::new(|| async {
            Err(Error::Network("HTTP 500".to_string()))
        }));
        manager
            .register(reviews.clone(), failing, config())
            .await
            .unwrap();

        let results = manager.sync_all().await;
        assert_eq!(results.len(), 2);
        for (name, result) in results {
            let result = result.unwrap();
            if name == therapists {
                assert_eq!(result.outcome, SyncOutcome::Synced { records: 2 });
            } else {
                assert!(result.is_failed());
            }
        }

        assert_eq!(manager.collections().await, vec![reviews.clone(), therapists.clone()]);
        let states = manager.states().await;
        assert_eq!(states.len(), 2);

        manager.reset(&therapists).await.unwrap();
        assert!(manager
            .store()
            .get_all(&therapists)
            .await
            .unwrap()
            .is_empty());
    }
}
