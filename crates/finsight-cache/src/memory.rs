use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use finsight_models::tier::BackendKind;
use moka::future::Cache;
use moka::Expiry;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::CacheError;
use crate::store::{append_capped, KvStore};

#[derive(Clone)]
struct Entry {
    value: Arc<Value>,
    ttl: Duration,
}

/// Each entry expires after the TTL it was last written with.
struct WriteTtl;

impl Expiry<String, Entry> for WriteTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process key/value store backed by moka.
///
/// Used directly when no database is configured and as the fallback when the
/// database cannot be opened. Contents do not outlive the process.
pub struct MemoryKv {
    inner: Cache<String, Entry>,
    /// Serializes read-modify-write list appends.
    append_lock: Mutex<()>,
}

impl MemoryKv {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(WriteTtl)
                .build(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        Ok(self.inner.get(key).await.map(|e| (*e.value).clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheError> {
        self.inner
            .insert(
                key.to_string(),
                Entry {
                    value: Arc::new(value),
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.inner.remove(key).await.is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let keys: Vec<Arc<String>> = self
            .inner
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k)
            .collect();
        let mut removed = 0;
        for key in keys {
            if self.inner.remove(key.as_str()).await.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn push_capped(
        &self,
        key: &str,
        item: Value,
        cap: usize,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let _guard = self.append_lock.lock().await;
        let current = self.get(key).await?;
        self.set(key, append_capped(current, item, cap), ttl).await
    }

    fn backend(&self) -> BackendKind {
        BackendKind::InProcess
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn set_and_get() {
        let kv = MemoryKv::new(100);
        kv.set("k1", json!({"a": 1}), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(kv.get("k1").await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(kv.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let kv = MemoryKv::new(100);
        kv.set("k1", json!(1), Duration::from_secs(60)).await.unwrap();
        assert!(kv.delete("k1").await.unwrap());
        assert!(!kv.delete("k1").await.unwrap());
        assert!(!kv.exists("k1").await.unwrap());
    }

    #[tokio::test]
    async fn ttl_expiration() {
        let kv = MemoryKv::new(100);
        kv.set("k1", json!("v"), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(kv.exists("k1").await.unwrap());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(kv.get("k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_write_ttl_governs() {
        let kv = MemoryKv::new(100);
        kv.set("k1", json!(1), Duration::from_millis(50)).await.unwrap();
        kv.set("k1", json!(2), Duration::from_secs(60)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(kv.get("k1").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn delete_prefix_only_matching() {
        let kv = MemoryKv::new(100);
        let ttl = Duration::from_secs(60);
        kv.set("run:r1:quote:AAPL", json!(1), ttl).await.unwrap();
        kv.set("run:r1:news:AAPL", json!(2), ttl).await.unwrap();
        kv.set("run:r2:quote:AAPL", json!(3), ttl).await.unwrap();

        assert_eq!(kv.delete_prefix("run:r1:").await.unwrap(), 2);
        assert!(kv.get("run:r1:quote:AAPL").await.unwrap().is_none());
        assert_eq!(kv.get("run:r2:quote:AAPL").await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn concurrent_appends_are_not_lost() {
        let kv = Arc::new(MemoryKv::new(100));
        let mut handles = Vec::new();
        for i in 0..20 {
            let kv = kv.clone();
            handles.push(tokio::spawn(async move {
                kv.push_capped("list", json!(i), 50, Duration::from_secs(60))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let list = kv.get("list").await.unwrap().unwrap();
        assert_eq!(list.as_array().unwrap().len(), 20);
    }
}
