//! Named, independent response caches.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::request::Response;

/// Limits applied to one partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpirationPolicy {
    /// Oldest entries are evicted beyond this count.
    pub max_entries: Option<usize>,
    /// Entries older than this are never served.
    pub max_age: Option<Duration>,
}

impl ExpirationPolicy {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(max_entries: usize, max_age: Duration) -> Self {
        Self {
            max_entries: Some(max_entries),
            max_age: Some(max_age),
        }
    }
}

#[derive(Clone)]
struct CachedEntry {
    response: Response,
    stored_at: Instant,
}

/// One named cache.
pub struct CachePartition {
    name: String,
    policy: ExpirationPolicy,
    entries: RwLock<HashMap<String, CachedEntry>>,
}

impl CachePartition {
    pub fn new(name: impl Into<String>, policy: ExpirationPolicy) -> Self {
        Self {
            name: name.into(),
            policy,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &ExpirationPolicy {
        &self.policy
    }

    fn purge_expired(&self, entries: &mut HashMap<String, CachedEntry>) {
        if let Some(max_age) = self.policy.max_age {
            entries.retain(|_, e| e.stored_at.elapsed() <= max_age);
        }
    }

    /// The stored response for a request signature.
    pub fn get(&self, signature: &str) -> Option<Response> {
        let mut entries = self.entries.write().unwrap();
        self.purge_expired(&mut entries);
        entries.get(signature).map(|e| e.response.clone())
    }

    /// Store a response, evicting the oldest entry when full.
    pub fn put(&self, signature: impl Into<String>, response: Response) {
        let signature = signature.into();
        let mut entries = self.entries.write().unwrap();
        self.purge_expired(&mut entries);

        if let Some(max_entries) = self.policy.max_entries {
            while !entries.contains_key(&signature) && entries.len() >= max_entries.max(1) {
                let Some(victim) = entries
                    .iter()
                    .min_by_key(|(_, e)| e.stored_at)
                    .map(|(k, _)| k.clone())
                else {
                    break;
                };
                debug!("Evicting '{}' from cache '{}'", victim, self.name);
                entries.remove(&victim);
            }
        }

        entries.insert(
            signature,
            CachedEntry {
                response,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn delete(&self, signature: &str) -> bool {
        self.entries.write().unwrap().remove(signature).is_some()
    }

    pub fn len(&self) -> usize {
        let mut entries = self.entries.write().unwrap();
        self.purge_expired(&mut entries);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored signatures, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn clear(&self) {
        self.entries.write().unwrap().clear();
    }
}

/// All partitions, by name.
#[derive(Default)]
pub struct CacheStorage {
    partitions: RwLock<HashMap<String, Arc<CachePartition>>>,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a partition, creating it with `policy` if it does not exist.
    ///
    /// An existing partition keeps the policy it was created with.
    pub fn open(&self, name: &str, policy: &ExpirationPolicy) -> Arc<CachePartition> {
        if let Some(partition) = self.partitions.read().unwrap().get(name) {
            return Arc::clone(partition);
        }
        let mut partitions = self.partitions.write().unwrap();
        Arc::clone(
            partitions
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(CachePartition::new(name, policy.clone()))),
        )
    }

    pub fn get(&self, name: &str) -> Option<Arc<CachePartition>> {
        self.partitions.read().unwrap().get(name).cloned()
    }

    /// Partition names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.partitions.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn delete(&self, name: &str) -> bool {
        self.partitions.write().unwrap().remove(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get() {
        let partition = CachePartition::new("images", ExpirationPolicy::none());
        assert!(partition.get("https://x/a.png").is_none());

        partition.put("https://x/a.png", Response::ok("png"));
        assert_eq!(partition.get("https://x/a.png").unwrap().text(), "png");
        assert_eq!(partition.len(), 1);

        assert!(partition.delete("https://x/a.png"));
        assert!(partition.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_entries_evicts_oldest() {
        let partition = CachePartition::new(
            "images",
            ExpirationPolicy {
                max_entries: Some(2),
                max_age: None,
            },
        );

        partition.put("a", Response::ok("1"));
        tokio::time::advance(Duration::from_millis(10)).await;
        partition.put("b", Response::ok("2"));
        tokio::time::advance(Duration::from_millis(10)).await;

        // Overwriting an existing key never evicts.
        partition.put("b", Response::ok("2b"));
        assert_eq!(partition.keys(), vec!["a", "b"]);

        tokio::time::advance(Duration::from_millis(10)).await;
        partition.put("c", Response::ok("3"));
        assert_eq!(partition.keys(), vec!["b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_age() {
        let partition = CachePartition::new(
            "api-responses",
            ExpirationPolicy::new(50, Duration::from_secs(300)),
        );
        partition.put("https://x/api/therapists", Response::ok("[]"));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(partition.get("https://x/api/therapists").is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(partition.get("https://x/api/therapists").is_none());
    }

    #[test]
    fn test_partitions_are_independent() {
        let storage = CacheStorage::new();
        let images = storage.open("images", &ExpirationPolicy::none());
        let fonts = storage.open("font-files", &ExpirationPolicy::none());

        images.put("https://x/a", Response::ok("image"));
        assert!(fonts.get("https://x/a").is_none());

        let again = storage.open("images", &ExpirationPolicy::new(1, Duration::from_secs(1)));
        assert!(again.get("https://x/a").is_some());
        assert_eq!(again.policy(), &ExpirationPolicy::none());

        assert_eq!(storage.names(), vec!["font-files", "images"]);
        assert!(storage.delete("images"));
        assert!(storage.get("images").is_none());
    }
}
