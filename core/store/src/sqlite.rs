//! SQLite-backed record store.
//!
//! Persists collections locally for offline access across restarts. The
//! schema is versioned through `PRAGMA user_version` and migrated on open.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use carecache_common::{CollectionName, Error, Record, Result};

use crate::store::RecordStore;

/// Current on-disk schema version.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA_V1: &str = r#"
    CREATE TABLE IF NOT EXISTS collections (
        name TEXT PRIMARY KEY,
        created_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS records (
        collection TEXT NOT NULL,
        id TEXT NOT NULL,
        body TEXT NOT NULL,
        PRIMARY KEY (collection, id)
    );

    CREATE TABLE IF NOT EXISTS sync_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
"#;

fn storage_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

fn ensure_collection(conn: &Connection, collection: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO collections (name, created_at) VALUES (?1, strftime('%s', 'now'))",
        params![collection],
    )?;
    Ok(())
}

fn parse_body(collection: &str, body: &str) -> Result<Record> {
    Record::from_json(body)
        .map_err(|e| Error::Storage(format!("Corrupt record in '{}': {}", collection, e)))
}

/// Durable record store using SQLite.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create or open a store database.
    ///
    /// # Errors
    /// - Database creation failure
    /// - Database written by a newer schema version
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref()).map_err(storage_err)?;
        Self::migrate(&conn)?;
        info!("Record store opened at {}", db_path.as_ref().display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        Self::migrate(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate(conn: &Connection) -> Result<()> {
        let version: i64 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(storage_err)?;

        if version > SCHEMA_VERSION {
            return Err(Error::Storage(format!(
                "Database schema version {} is newer than supported version {}",
                version, SCHEMA_VERSION
            )));
        }

        if version < 1 {
            debug!("Migrating record store schema to version 1");
            conn.execute_batch(SCHEMA_V1).map_err(storage_err)?;
        }

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)
            .map_err(storage_err)?;
        Ok(())
    }

    /// Run a blocking operation against the connection off the async runtime.
    async fn with_conn<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| Error::Storage("Store connection poisoned".to_string()))?;
            op(&mut conn)
        })
        .await
        .map_err(|e| Error::Storage(format!("Store task failed: {}", e)))?
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_all(&self, collection: &CollectionName) -> Result<Vec<Record>> {
        let collection = collection.as_str().to_string();
        self.with_conn(move |conn| {
            ensure_collection(conn, &collection).map_err(storage_err)?;
            let mut stmt = conn
                .prepare("SELECT body FROM records WHERE collection = ?1 ORDER BY id")
                .map_err(storage_err)?;
            let bodies = stmt
                .query_map(params![collection], |row| row.get::<_, String>(0))
                .map_err(storage_err)?
                .collect::<rusqlite::Result<Vec<String>>>()
                .map_err(storage_err)?;

            bodies
                .iter()
                .map(|body| parse_body(&collection, body))
                .collect()
        })
        .await
    }

    async fn get_by_id(&self, collection: &CollectionName, id: &str) -> Result<Option<Record>> {
        let collection = collection.as_str().to_string();
        let id = id.to_string();
        self.with_conn(move |conn| {
            ensure_collection(conn, &collection).map_err(storage_err)?;
            let body: Option<String> = conn
                .query_row(
                    "SELECT body FROM records WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err)?;

            body.map(|b| parse_body(&collection, &b)).transpose()
        })
        .await
    }

    async fn put(&self, collection: &CollectionName, record: Record) -> Result<()> {
        let collection = collection.as_str().to_string();
        let body = record.to_json()?;
        let id = record.id().to_string();
        self.with_conn(move |conn| {
            ensure_collection(conn, &collection).map_err(storage_err)?;
            conn.execute(
                "INSERT OR REPLACE INTO records (collection, id, body) VALUES (?1, ?2, ?3)",
                params![collection, id, body],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, collection: &CollectionName, id: &str) -> Result<()> {
        let collection = collection.as_str().to_string();
        let id = id.to_string();
        self.with_conn(move |conn| {
            ensure_collection(conn, &collection).map_err(storage_err)?;
            conn.execute(
                "DELETE FROM records WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn clear(&self, collection: &CollectionName) -> Result<()> {
        let collection = collection.as_str().to_string();
        self.with_conn(move |conn| {
            ensure_collection(conn, &collection).map_err(storage_err)?;
            conn.execute(
                "DELETE FROM records WHERE collection = ?1",
                params![collection],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn replace_all(&self, collection: &CollectionName, records: Vec<Record>) -> Result<()> {
        let collection = collection.as_str().to_string();
        let rows = records
            .iter()
            .map(|r| Ok((r.id().to_string(), r.to_json()?)))
            .collect::<Result<Vec<(String, String)>>>()?;

        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(storage_err)?;
            ensure_collection(&tx, &collection).map_err(storage_err)?;
            tx.execute(
                "DELETE FROM records WHERE collection = ?1",
                params![collection],
            )
            .map_err(storage_err)?;
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT OR REPLACE INTO records (collection, id, body) VALUES (?1, ?2, ?3)",
                    )
                    .map_err(storage_err)?;
                for (id, body) in &rows {
                    stmt.execute(params![collection, id, body])
                        .map_err(storage_err)?;
                }
            }
            tx.commit().map_err(storage_err)?;
            debug!("Replaced '{}' with {} records", collection, rows.len());
            Ok(())
        })
        .await
    }

    async fn collections(&self) -> Result<Vec<CollectionName>> {
        let names = self
            .with_conn(|conn| {
                let mut stmt = conn
                    .prepare("SELECT name FROM collections ORDER BY name")
                    .map_err(storage_err)?;
                let names = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(storage_err)?
                    .collect::<rusqlite::Result<Vec<String>>>()
                    .map_err(storage_err)?;
                Ok(names)
            })
            .await?;

        names.into_iter().map(CollectionName::new).collect()
    }

    async fn get_meta(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_string();
        let raw: Option<String> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT value FROM sync_meta WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(storage_err)
            })
            .await?;

        raw.map(|v| serde_json::from_str(&v).map_err(|e| Error::Serialization(e.to_string())))
            .transpose()
    }

    async fn set_meta(&self, key: &str, value: Value) -> Result<()> {
        let key = key.to_string();
        let raw = serde_json::to_string(&value).map_err(|e| Error::Serialization(e.to_string()))?;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sync_meta (key, value) VALUES (?1, ?2)",
                params![key, raw],
            )
            .map_err(storage_err)?;
            Ok(())
        })
        .await
    }

    async fn delete_meta(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM sync_meta WHERE key = ?1", params![key])
                .map_err(storage_err)?;
            Ok(())
        })
        .await
    }
}
