// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Mapping store (C7): optional persisted `key -> (id, timestamp)` records
//! so UID/GID allocations survive a restart.
//!
//! `MappingStore` is a small async trait (REDESIGN GUIDANCE favors a trait
//! with few implementations here over a sum type, since the two
//! implementations — SQLite and no-op — don't share any dispatch logic with
//! the rest of the system the way the IdP adapters do). The concrete backend
//! is a single SQLite file via `rusqlite`'s bundled engine; the connection
//! is not `Sync`, so it lives behind a `Mutex` and is driven synchronously
//! from inside the async trait methods.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::config::MappingStoreConfig;
use crate::model::{IdNamespace, MappingRecord};

const KEY_PREFIX: &str = "ldaptoid";

pub fn namespaced_key(namespace: IdNamespace, idp_id: &str) -> String {
    format!("{KEY_PREFIX}:{}:{}", namespace.as_str(), idp_id)
}

pub fn now_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, Error)]
pub enum MappingStoreError {
    #[error("mapping store connection error: {0}")]
    Connection(String),
    #[error("mapping store operation timed out")]
    Timeout,
    #[error("mapping store serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for MappingStoreError {
    fn from(e: rusqlite::Error) -> Self {
        MappingStoreError::Connection(e.to_string())
    }
}

#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn connect(&self) -> Result<(), MappingStoreError>;
    async fn put(&self, record: MappingRecord) -> Result<(), MappingStoreError>;
    async fn get(&self, key: &str) -> Result<Option<MappingRecord>, MappingStoreError>;
    async fn list(&self) -> Result<Vec<MappingRecord>, MappingStoreError>;
    async fn ping(&self) -> bool;
}

/// Satisfies the trait when `mappingStore.enabled=false`, so the rest of
/// the system never branches on whether persistence is configured.
pub struct NoopMappingStore;

#[async_trait]
impl MappingStore for NoopMappingStore {
    async fn connect(&self) -> Result<(), MappingStoreError> {
        Ok(())
    }

    async fn put(&self, _record: MappingRecord) -> Result<(), MappingStoreError> {
        Ok(())
    }

    async fn get(&self, _key: &str) -> Result<Option<MappingRecord>, MappingStoreError> {
        Ok(None)
    }

    async fn list(&self) -> Result<Vec<MappingRecord>, MappingStoreError> {
        Ok(Vec::new())
    }

    async fn ping(&self) -> bool {
        true
    }
}

pub struct SqliteMappingStore {
    conn: Mutex<Connection>,
    timeout: std::time::Duration,
}

impl SqliteMappingStore {
    pub fn new(config: &MappingStoreConfig, timeout: std::time::Duration) -> Result<Self, MappingStoreError> {
        let conn = Connection::open(&config.path)
            .map_err(|e| MappingStoreError::Connection(format!("opening {}: {e}", config.path)))?;
        let store = Self { conn: Mutex::new(conn), timeout };
        store.init_schema()?;
        Ok(store)
    }

    #[cfg(test)]
    fn new_in_memory() -> Self {
        let conn = Connection::open_in_memory().expect("open in-memory sqlite database");
        let store = Self { conn: Mutex::new(conn), timeout: std::time::Duration::from_secs(3) };
        store.init_schema().expect("create mapping table");
        store
    }

    fn init_schema(&self) -> Result<(), MappingStoreError> {
        let conn = self.conn.lock().expect("mapping store mutex poisoned");
        conn.execute(
            "CREATE TABLE IF NOT EXISTS id_mappings (
                key TEXT PRIMARY KEY,
                id INTEGER NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }
}

#[async_trait]
impl MappingStore for SqliteMappingStore {
    async fn connect(&self) -> Result<(), MappingStoreError> {
        self.conn.lock().expect("mapping store mutex poisoned");
        Ok(())
    }

    async fn put(&self, record: MappingRecord) -> Result<(), MappingStoreError> {
        with_timeout(self.timeout, async {
            let conn = self.conn.lock().expect("mapping store mutex poisoned");
            conn.execute(
                "INSERT INTO id_mappings (key, id, timestamp) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET id = excluded.id, timestamp = excluded.timestamp",
                params![record.key, record.id, record.timestamp as i64],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<MappingRecord>, MappingStoreError> {
        with_timeout(self.timeout, async {
            let conn = self.conn.lock().expect("mapping store mutex poisoned");
            conn.query_row(
                "SELECT key, id, timestamp FROM id_mappings WHERE key = ?1",
                params![key],
                row_to_record,
            )
            .optional()
            .map_err(MappingStoreError::from)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<MappingRecord>, MappingStoreError> {
        with_timeout(self.timeout, async {
            let conn = self.conn.lock().expect("mapping store mutex poisoned");
            let mut stmt = conn.prepare("SELECT key, id, timestamp FROM id_mappings WHERE key LIKE ?1")?;
            let rows = stmt
                .query_map(params![format!("{KEY_PREFIX}:%")], row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    async fn ping(&self) -> bool {
        self.conn
            .lock()
            .expect("mapping store mutex poisoned")
            .execute_batch("SELECT 1")
            .is_ok()
    }
}

/// Runs `op` under the configured operation timeout (§5), mapping an
/// elapsed deadline to [`MappingStoreError::Timeout`].
async fn with_timeout<T, F>(timeout: std::time::Duration, op: F) -> Result<T, MappingStoreError>
where
    F: std::future::Future<Output = Result<T, MappingStoreError>>,
{
    tokio::time::timeout(timeout, op)
        .await
        .unwrap_or(Err(MappingStoreError::Timeout))
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<MappingRecord> {
    Ok(MappingRecord {
        key: row.get(0)?,
        id: row.get(1)?,
        timestamp: row.get::<_, i64>(2)? as u64,
    })
}

/// Group a flat list of records by their namespace prefix, for seeding the
/// two `IdAllocator`s at startup.
pub fn partition_by_namespace(records: Vec<MappingRecord>) -> HashMap<&'static str, Vec<(String, i64)>> {
    let mut out: HashMap<&'static str, Vec<(String, i64)>> = HashMap::new();
    for record in records {
        let mut parts = record.key.splitn(3, ':');
        let _prefix = parts.next();
        let namespace = parts.next().unwrap_or("");
        let idp_id = parts.next().unwrap_or("").to_string();
        let ns_static = match namespace {
            "user" => "user",
            "group" => "group",
            "synthetic" => "synthetic",
            _ => continue,
        };
        out.entry(ns_static).or_default().push((idp_id, record.id));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaced_key_format() {
        assert_eq!(namespaced_key(IdNamespace::User, "abc-123"), "ldaptoid:user:abc-123");
        assert_eq!(
            namespaced_key(IdNamespace::Synthetic, "abc-123"),
            "ldaptoid:synthetic:abc-123"
        );
    }

    #[test]
    fn partition_groups_by_namespace() {
        let records = vec![
            MappingRecord {
                key: "ldaptoid:user:u1".into(),
                id: 10042,
                timestamp: 0,
            },
            MappingRecord {
                key: "ldaptoid:group:g1".into(),
                id: 20001,
                timestamp: 0,
            },
        ];
        let partitioned = partition_by_namespace(records);
        assert_eq!(partitioned.get("user").unwrap(), &vec![("u1".to_string(), 10042)]);
        assert_eq!(partitioned.get("group").unwrap(), &vec![("g1".to_string(), 20001)]);
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = SqliteMappingStore::new_in_memory();
        let record = MappingRecord {
            key: namespaced_key(IdNamespace::User, "u1"),
            id: 10042,
            timestamp: 1_700_000_000,
        };
        store.put(record.clone()).await.unwrap();
        let fetched = store.get(&record.key).await.unwrap().unwrap();
        assert_eq!(fetched.id, 10042);
    }

    #[tokio::test]
    async fn put_twice_overwrites_the_same_key() {
        let store = SqliteMappingStore::new_in_memory();
        let key = namespaced_key(IdNamespace::Group, "g1");
        store
            .put(MappingRecord { key: key.clone(), id: 20001, timestamp: 1 })
            .await
            .unwrap();
        store
            .put(MappingRecord { key: key.clone(), id: 20001, timestamp: 2 })
            .await
            .unwrap();
        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].timestamp, 2);
    }

    #[tokio::test]
    async fn list_returns_only_namespaced_keys() {
        let store = SqliteMappingStore::new_in_memory();
        store
            .put(MappingRecord { key: namespaced_key(IdNamespace::User, "u1"), id: 1, timestamp: 0 })
            .await
            .unwrap();
        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
