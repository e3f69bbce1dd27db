use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use finsight_models::tier::BackendKind;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::CacheError;
use crate::memory::MemoryKv;
use crate::sqlite::SqliteKv;

/// Key/value engine behind the session and run caches.
///
/// Implementations must be safe for concurrent use by many in-flight calls.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Value for `key`, or `None` when missing or expired.
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Write `value` under `key`. A later write replaces both value and TTL.
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError>;

    /// Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every entry whose key starts with `prefix`. Returns the count removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.get(key).await?.is_some())
    }

    /// Append `item` to the JSON array under `key`, keeping the newest `cap` items.
    ///
    /// A missing, expired or non-array value starts a fresh list. The TTL is reset.
    async fn push_capped(
        &self,
        key: &str,
        item: Value,
        cap: usize,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    fn backend(&self) -> BackendKind;
}

/// Append to a list value and drop from the front past `cap`.
pub(crate) fn append_capped(current: Option<Value>, item: Value, cap: usize) -> Value {
    let mut items = match current {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };
    items.push(item);
    if items.len() > cap {
        let excess = items.len() - cap;
        items.drain(..excess);
    }
    Value::Array(items)
}

/// Open the configured backend for a key/value tier.
///
/// With a database path, opens SQLite; if that fails the tier logs once and
/// runs on the in-process cache for the rest of the process. No reconnects.
pub fn connect_kv(tier: &str, db_path: Option<&str>, max_entries: u64) -> Arc<dyn KvStore> {
    match db_path {
        Some(path) => match SqliteKv::open(path) {
            Ok(store) => {
                info!(tier, path, "Opened SQLite key/value backend");
                Arc::new(store)
            }
            Err(e) => {
                warn!(
                    tier,
                    path,
                    error = %e,
                    "Backing store unavailable, falling back to in-process cache"
                );
                Arc::new(MemoryKv::new(max_entries))
            }
        },
        None => {
            info!(tier, "No database configured, using in-process cache");
            Arc::new(MemoryKv::new(max_entries))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn append_capped_drops_oldest() {
        let mut value = None;
        for i in 0..5 {
            value = Some(append_capped(value, json!(i), 3));
        }
        assert_eq!(value.unwrap(), json!([2, 3, 4]));
    }

    #[test]
    fn append_capped_replaces_non_list() {
        let value = append_capped(Some(json!({"stale": true})), json!("a"), 3);
        assert_eq!(value, json!(["a"]));
    }

    #[test]
    fn connect_without_path_is_in_process() {
        let store = connect_kv("session_cache", None, 100);
        assert_eq!(store.backend(), BackendKind::InProcess);
    }

    #[test]
    fn connect_unreachable_path_falls_back() {
        let store = connect_kv(
            "run_cache",
            Some("/nonexistent-dir/definitely/missing/run.db"),
            100,
        );
        assert_eq!(store.backend(), BackendKind::InProcess);
    }

    #[test]
    fn connect_file_path_uses_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.db");
        let store = connect_kv("session_cache", path.to_str(), 100);
        assert_eq!(store.backend(), BackendKind::Sqlite);
    }
}
