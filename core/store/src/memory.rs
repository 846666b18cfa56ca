//! In-memory record store for testing.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use carecache_common::{CollectionName, Record, Result};

use crate::store::RecordStore;

type Collection = BTreeMap<String, Record>;

/// In-memory record store.
///
/// Useful for testing and ephemeral runs. All data is stored in memory
/// and lost on drop.
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<CollectionName, Collection>>>,
    meta: Arc<RwLock<HashMap<String, Value>>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
            meta: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_all(&self, collection: &CollectionName) -> Result<Vec<Record>> {
        let mut collections = self.collections.write().unwrap();
        let records = collections.entry(collection.clone()).or_default();
        Ok(records.values().cloned().collect())
    }

    async fn get_by_id(&self, collection: &CollectionName, id: &str) -> Result<Option<Record>> {
        let mut collections = self.collections.write().unwrap();
        let records = collections.entry(collection.clone()).or_default();
        Ok(records.get(id).cloned())
    }

    async fn put(&self, collection: &CollectionName, record: Record) -> Result<()> {
        let mut collections = self.collections.write().unwrap();
        collections
            .entry(collection.clone())
            .or_default()
            .insert(record.id().to_string(), record);
        Ok(())
    }

    async fn delete(&self, collection: &CollectionName, id: &str) -> Result<()> {
        let mut collections = self.collections.write().unwrap();
        collections.entry(collection.clone()).or_default().remove(id);
        Ok(())
    }

    async fn clear(&self, collection: &CollectionName) -> Result<()> {
        let mut collections = self.collections.write().unwrap();
        collections.entry(collection.clone()).or_default().clear();
        Ok(())
    }

    async fn replace_all(&self, collection: &CollectionName, records: Vec<Record>) -> Result<()> {
        let fresh: Collection = records
            .into_iter()
            .map(|r| (r.id().to_string(), r))
            .collect();
        self.collections
            .write()
            .unwrap()
            .insert(collection.clone(), fresh);
        Ok(())
    }

    async fn collections(&self) -> Result<Vec<CollectionName>> {
        let collections = self.collections.read().unwrap();
        let mut names: Vec<CollectionName> = collections.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn get_meta(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.meta.read().unwrap().get(key).cloned())
    }

    async fn set_meta(&self, key: &str, value: Value) -> Result<()> {
        self.meta.write().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete_meta(&self, key: &str) -> Result<()> {
        self.meta.write().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn therapists() -> CollectionName {
        CollectionName::new("therapists").unwrap()
    }

    fn record(id: &str, name: &str) -> Record {
        Record::from_value(json!({"id": id, "name": name})).unwrap()
    }

    #[tokio::test]
    async fn test_lazy_collection_creation() {
        let store = MemoryStore::new();
        assert!(store.collections().await.unwrap().is_empty());

        let all = store.get_all(&therapists()).await.unwrap();
        assert!(all.is_empty());
        assert_eq!(store.collections().await.unwrap(), vec![therapists()]);
    }

    #[tokio::test]
    async fn test_put_replaces_by_id() {
        let store = MemoryStore::new();
        store.put(&therapists(), record("t1", "Ada")).await.unwrap();
        store.put(&therapists(), record("t1", "Grace")).await.unwrap();

        let all = store.get_all(&therapists()).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].get("name"), Some(&json!("Grace")));
    }

    #[tokio::test]
    async fn test_get_all_ordered_by_id() {
        let store = MemoryStore::new();
        store.put(&therapists(), record("t3", "c")).await.unwrap();
        store.put(&therapists(), record("t1", "a")).await.unwrap();
        store.put(&therapists(), record("t2", "b")).await.unwrap();

        let ids: Vec<String> = store
            .get_all(&therapists())
            .await
            .unwrap()
            .iter()
            .map(|r| r.id().to_string())
            .collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let store = MemoryStore::new();
        store.put(&therapists(), record("t1", "a")).await.unwrap();
        store.put(&therapists(), record("t2", "b")).await.unwrap();

        store.delete(&therapists(), "t1").await.unwrap();
        store.delete(&therapists(), "missing").await.unwrap();
        assert!(store.get_by_id(&therapists(), "t1").await.unwrap().is_none());
        assert!(store.get_by_id(&therapists(), "t2").await.unwrap().is_some());

        store.clear(&therapists()).await.unwrap();
        assert!(store.get_all(&therapists()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_collections_are_independent() {
        let store = MemoryStore::new();
        let clinics = CollectionName::new("clinics").unwrap();
        store.put(&therapists(), record("x", "a")).await.unwrap();
        store.put(&clinics, record("x", "b")).await.unwrap();

        store.clear(&therapists()).await.unwrap();
        assert_eq!(store.get_all(&clinics).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_meta_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.get_meta("k").await.unwrap().is_none());
        store.set_meta("k", json!({"a": 1})).await.unwrap();
        assert_eq!(store.get_meta("k").await.unwrap(), Some(json!({"a": 1})));
        store.delete_meta("k").await.unwrap();
        assert!(store.get_meta("k").await.unwrap().is_none());
    }
}
