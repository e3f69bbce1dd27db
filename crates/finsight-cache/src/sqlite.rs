use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use finsight_models::cache_schema::KV_TABLE_DDL;
use finsight_models::tier::BackendKind;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;

use crate::error::CacheError;
use crate::store::{append_capped, KvStore};

/// SQLite-backed key/value store with per-row expiry.
///
/// Expired rows are invisible to reads and removed by [`SqliteKv::expire_stale`].
/// `rusqlite::Connection` is not `Sync`, so access goes through a mutex on the
/// blocking pool.
#[derive(Clone)]
pub struct SqliteKv {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteKv {
    /// Open (or create) a database file. Creates the schema and enables WAL.
    pub fn open(path: &str) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(KV_TABLE_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database with the schema. Useful for testing.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(KV_TABLE_DDL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run_blocking<F, R>(&self, f: F) -> Result<R, CacheError>
    where
        F: FnOnce(&mut Connection) -> Result<R, CacheError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| CacheError::Unavailable(format!("SQLite mutex poisoned: {e}")))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| CacheError::Unavailable(format!("blocking task failed: {e}")))?
    }

    /// Delete all expired rows. Returns the number of rows deleted.
    pub async fn expire_stale(&self) -> Result<usize, CacheError> {
        self.run_blocking(|conn| {
            let deleted = conn.execute(
                "DELETE FROM kv_entries WHERE expires_at <= ?1",
                rusqlite::params![now_ms()],
            )?;
            Ok(deleted)
        })
        .await
    }

    /// Count all rows, expired or not.
    pub async fn count(&self) -> Result<usize, CacheError> {
        self.run_blocking(|conn| {
            let count: usize =
                conn.query_row("SELECT COUNT(*) FROM kv_entries", [], |row| row.get(0))?;
            Ok(count)
        })
        .await
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_ms(ttl: Duration) -> i64 {
    now_ms().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

fn read_live(conn: &Connection, key: &str) -> Result<Option<Value>, CacheError> {
    let mut stmt = conn
        .prepare_cached("SELECT value_json FROM kv_entries WHERE key = ?1 AND expires_at > ?2")?;
    let json: Option<String> = stmt
        .query_row(rusqlite::params![key, now_ms()], |row| row.get(0))
        .optional()?;
    match json {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

fn write(conn: &Connection, key: &str, value: &Value, ttl: Duration) -> Result<(), CacheError> {
    let now = Utc::now().to_rfc3339();
    let json = serde_json::to_string(value)?;
    let mut stmt = conn.prepare_cached(
        "INSERT INTO kv_entries (key, value_json, expires_at, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?4) \
         ON CONFLICT(key) DO UPDATE SET \
             value_json = excluded.value_json, \
             expires_at = excluded.expires_at, \
             updated_at = excluded.updated_at",
    )?;
    stmt.execute(rusqlite::params![key, json, expiry_ms(ttl), now])?;
    Ok(())
}

#[async_trait]
impl KvStore for SqliteKv {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let key = key.to_string();
        self.run_blocking(move |conn| read_live(conn, &key)).await
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        let key = key.to_string();
        self.run_blocking(move |conn| write(conn, &key, &value, ttl))
            .await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let key = key.to_string();
        self.run_blocking(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM kv_entries WHERE key = ?1 AND expires_at > ?2",
                rusqlite::params![key, now_ms()],
            )?;
            // Drop an expired leftover too.
            conn.execute(
                "DELETE FROM kv_entries WHERE key = ?1",
                rusqlite::params![key],
            )?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let prefix = prefix.to_string();
        self.run_blocking(move |conn| {
            // substr match avoids LIKE wildcards inside ids
            let deleted = conn.execute(
                "DELETE FROM kv_entries WHERE substr(key, 1, length(?1)) = ?1",
                rusqlite::params![prefix],
            )?;
            Ok(deleted as u64)
        })
        .await
    }

    async fn push_capped(
        &self,
        key: &str,
        item: Value,
        cap: usize,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let key = key.to_string();
        self.run_blocking(move |conn| {
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            let current = read_live(&tx, &key)?;
            write(&tx, &key, &append_capped(current, item, cap), ttl)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Sqlite
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn get_existing_key() {
        let kv = SqliteKv::open_in_memory().unwrap();
        kv.set("finsight:session:s1", json!({"ticker": "AAPL"}), Duration::from_secs(60))
            .await
            .unwrap();

        let value = kv.get("finsight:session:s1").await.unwrap();
        assert_eq!(value, Some(json!({"ticker": "AAPL"})));
    }

    #[tokio::test]
    async fn get_missing_key() {
        let kv = SqliteKv::open_in_memory().unwrap();
        assert!(kv.get("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_row_is_invisible() {
        let kv = SqliteKv::open_in_memory().unwrap();
        kv.set("k", json!(1), Duration::ZERO).await.unwrap();
        assert!(kv.get("k").await.unwrap().is_none());
        assert!(!kv.exists("k").await.unwrap());
        assert_eq!(kv.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn overwrite_replaces_value_and_ttl() {
        let kv = SqliteKv::open_in_memory().unwrap();
        kv.set("k", json!(1), Duration::ZERO).await.unwrap();
        kv.set("k", json!(2), Duration::from_secs(60)).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some(json!(2)));
        assert_eq!(kv.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expire_stale_removes_only_expired() {
        let kv = SqliteKv::open_in_memory().unwrap();
        kv.set("old", json!(1), Duration::ZERO).await.unwrap();
        kv.set("fresh", json!(2), Duration::from_secs(60)).await.unwrap();

        assert_eq!(kv.expire_stale().await.unwrap(), 1);
        assert_eq!(kv.count().await.unwrap(), 1);
        assert!(kv.exists("fresh").await.unwrap());
    }

    #[tokio::test]
    async fn delete_prefix_treats_wildcards_literally() {
        let kv = SqliteKv::open_in_memory().unwrap();
        let ttl = Duration::from_secs(60);
        kv.set("run:r_1:quote", json!(1), ttl).await.unwrap();
        kv.set("run:rx1:quote", json!(2), ttl).await.unwrap();

        assert_eq!(kv.delete_prefix("run:r_1:").await.unwrap(), 1);
        assert!(kv.exists("run:rx1:quote").await.unwrap());
    }

    #[tokio::test]
    async fn push_capped_keeps_newest() {
        let kv = SqliteKv::open_in_memory().unwrap();
        for i in 0..6 {
            kv.push_capped("history", json!(i), 4, Duration::from_secs(60))
                .await
                .unwrap();
        }
        assert_eq!(kv.get("history").await.unwrap(), Some(json!([2, 3, 4, 5])));
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let kv = SqliteKv::open_in_memory().unwrap();
        kv.set("k", json!(true), Duration::from_secs(60)).await.unwrap();
        assert!(kv.delete("k").await.unwrap());
        assert!(!kv.delete("k").await.unwrap());
    }
}
