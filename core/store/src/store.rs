//! Record store trait definition.

use async_trait::async_trait;
use serde_json::Value;

use carecache_common::{CollectionName, Record, Result};

/// Local store of named record collections.
///
/// Every operation may be called before any explicit initialisation; the
/// first call touching a collection creates it. Collections are independent
/// of each other and no cross-collection transaction is offered.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Get the backend name (e.g., "memory", "sqlite").
    fn name(&self) -> &str;

    /// All records of a collection, ordered by id.
    async fn get_all(&self, collection: &CollectionName) -> Result<Vec<Record>>;

    /// A single record, or `None` when absent.
    async fn get_by_id(&self, collection: &CollectionName, id: &str) -> Result<Option<Record>>;

    /// Insert or replace a record by id.
    async fn put(&self, collection: &CollectionName, record: Record) -> Result<()>;

    /// Delete a record. Deleting a missing id is not an error.
    async fn delete(&self, collection: &CollectionName, id: &str) -> Result<()>;

    /// Remove every record of a collection.
    async fn clear(&self, collection: &CollectionName) -> Result<()>;

    /// Replace the whole collection with `records`.
    ///
    /// The default clears and then puts each record, so a fault part-way
    /// through can leave the collection partially filled. Backends with
    /// transactions override this to make the swap atomic.
    async fn replace_all(&self, collection: &CollectionName, records: Vec<Record>) -> Result<()> {
        self.clear(collection).await?;
        for record in records {
            self.put(collection, record).await?;
        }
        Ok(())
    }

    /// Names of every collection created so far.
    async fn collections(&self) -> Result<Vec<CollectionName>>;

    /// Read a bookkeeping value.
    async fn get_meta(&self, key: &str) -> Result<Option<Value>>;

    /// Write a bookkeeping value.
    async fn set_meta(&self, key: &str, value: Value) -> Result<()>;

    /// Delete a bookkeeping value.
    async fn delete_meta(&self, key: &str) -> Result<()>;
}
