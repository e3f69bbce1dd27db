use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use finsight_models::cache_schema::key_patterns;
use finsight_models::config::RunCacheConfig;
use finsight_models::tier::BackendKind;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::CacheError;
use crate::session::require_id;
use crate::store::KvStore;

/// TTL by tool kind, matched in order against the lower-cased tool name.
pub const TOOL_TTLS: [(&str, u64); 7] = [
    ("quote", 60),
    ("ohlcv", 300),
    ("news", 600),
    ("fundamentals", 3600),
    ("options", 120),
    ("ta", 300),
    ("crypto", 30),
];

/// TTL for a tool: first table entry contained in the tool name, else `default`.
pub fn ttl_for_tool(tool: &str, default: Duration) -> Duration {
    let tool = tool.to_ascii_lowercase();
    TOOL_TTLS
        .iter()
        .find(|(kind, _)| tool.contains(kind))
        .map(|(_, secs)| Duration::from_secs(*secs))
        .unwrap_or(default)
}

/// Order-independent hash of tool parameters: first 16 hex chars of SHA-256
/// over the key-sorted JSON encoding.
pub fn params_hash(params: &BTreeMap<String, Value>) -> String {
    // serde_json::Map is key-sorted too, so nested objects hash stably
    let encoded = serde_json::to_string(params).unwrap_or_default();
    let digest = Sha256::digest(encoded.as_bytes());
    digest
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Identity of one cached tool result within a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunCacheKey {
    pub run_id: String,
    pub tool: String,
    pub ticker: Option<String>,
    pub params: BTreeMap<String, Value>,
}

impl RunCacheKey {
    pub fn new(run_id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            tool: tool.into(),
            ticker: None,
            params: BTreeMap::new(),
        }
    }

    /// Tickers are stored upper-cased.
    pub fn ticker(mut self, ticker: &str) -> Self {
        self.ticker = Some(ticker.trim().to_ascii_uppercase());
        self
    }

    pub fn param(mut self, name: &str, value: Value) -> Self {
        self.params.insert(name.to_string(), value);
        self
    }

    pub fn params(mut self, params: BTreeMap<String, Value>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn params_hash(&self) -> Option<String> {
        (!self.params.is_empty()).then(|| params_hash(&self.params))
    }

    pub fn to_key(&self, prefix: &str) -> String {
        key_patterns::run(
            prefix,
            &self.run_id,
            &self.tool,
            self.ticker.as_deref(),
            self.params_hash().as_deref(),
        )
    }

    fn validate(&self) -> Result<(), CacheError> {
        require_id("run_id", &self.run_id)?;
        require_id("tool", &self.tool)
    }
}

/// Per-run tool result deduplication.
///
/// Entries are only read by the run that wrote them and are dropped at run end
/// through [`RunCache::invalidate_run`].
pub struct RunCache {
    store: Arc<dyn KvStore>,
    config: RunCacheConfig,
}

impl RunCache {
    pub fn new(store: Arc<dyn KvStore>, config: RunCacheConfig) -> Self {
        Self { store, config }
    }

    pub fn backend(&self) -> BackendKind {
        self.store.backend()
    }

    pub fn ttl_for(&self, tool: &str) -> Duration {
        ttl_for_tool(tool, Duration::from_secs(self.config.default_ttl_seconds))
    }

    pub async fn get(&self, key: &RunCacheKey) -> Result<Option<Value>, CacheError> {
        key.validate()?;
        let raw = key.to_key(&self.config.key_prefix);
        let value = self.store.get(&raw).await?;
        debug!(key = %raw, hit = value.is_some(), "Run cache lookup");
        Ok(value)
    }

    /// Typed read. A value that does not fit `T` is an error.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        key: &RunCacheKey,
    ) -> Result<Option<T>, CacheError> {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Write with the tool's TTL.
    pub async fn set(&self, key: &RunCacheKey, value: Value) -> Result<(), CacheError> {
        let ttl = self.ttl_for(&key.tool);
        self.set_with_ttl(key, value, ttl).await
    }

    pub async fn set_with_ttl(
        &self,
        key: &RunCacheKey,
        value: Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        key.validate()?;
        let raw = key.to_key(&self.config.key_prefix);
        debug!(key = %raw, ttl_secs = ttl.as_secs(), "Run cache write");
        self.store.set(&raw, value, ttl).await
    }

    pub async fn exists(&self, key: &RunCacheKey) -> Result<bool, CacheError> {
        key.validate()?;
        self.store
            .exists(&key.to_key(&self.config.key_prefix))
            .await
    }

    /// Drop every entry of a run. Returns the number removed.
    pub async fn invalidate_run(&self, run_id: &str) -> Result<u64, CacheError> {
        require_id("run_id", run_id)?;
        let removed = self
            .store
            .delete_prefix(&key_patterns::run_prefix(&self.config.key_prefix, run_id))
            .await?;
        info!(run_id, removed, "Invalidated run cache");
        Ok(removed)
    }

    /// Cached value for `key`, or the result of `fetch` (which is then cached).
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &RunCacheKey,
        fetch: F,
    ) -> Result<Value, CacheError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
        E: Display,
    {
        if let Some(value) = self.get(key).await? {
            return Ok(value);
        }
        let value = fetch()
            .await
            .map_err(|e| CacheError::Fetch(e.to_string()))?;
        self.set(key, value.clone()).await?;
        Ok(value)
    }

    // Convenience accessors for the common provider tools.

    pub fn quote_key(run_id: &str, ticker: &str) -> RunCacheKey {
        RunCacheKey::new(run_id, "quote").ticker(ticker)
    }

    pub fn ohlcv_key(run_id: &str, ticker: &str, interval: &str) -> RunCacheKey {
        RunCacheKey::new(run_id, "ohlcv")
            .ticker(ticker)
            .param("interval", json!(interval))
    }

    pub fn news_key(run_id: &str, ticker: &str, limit: u32) -> RunCacheKey {
        RunCacheKey::new(run_id, "news")
            .ticker(ticker)
            .param("limit", json!(limit))
    }

    pub fn fundamentals_key(run_id: &str, ticker: &str) -> RunCacheKey {
        RunCacheKey::new(run_id, "fundamentals").ticker(ticker)
    }

    pub async fn get_quote(&self, run_id: &str, ticker: &str) -> Result<Option<Value>, CacheError> {
        self.get(&Self::quote_key(run_id, ticker)).await
    }

    pub async fn set_quote(
        &self,
        run_id: &str,
        ticker: &str,
        quote: Value,
    ) -> Result<(), CacheError> {
        self.set(&Self::quote_key(run_id, ticker), quote).await
    }

    pub async fn get_ohlcv(
        &self,
        run_id: &str,
        ticker: &str,
        interval: &str,
    ) -> Result<Option<Value>, CacheError> {
        self.get(&Self::ohlcv_key(run_id, ticker, interval)).await
    }

    pub async fn set_ohlcv(
        &self,
        run_id: &str,
        ticker: &str,
        interval: &str,
        bars: Value,
    ) -> Result<(), CacheError> {
        self.set(&Self::ohlcv_key(run_id, ticker, interval), bars)
            .await
    }

    pub async fn get_news(
        &self,
        run_id: &str,
        ticker: &str,
        limit: u32,
    ) -> Result<Option<Value>, CacheError> {
        self.get(&Self::news_key(run_id, ticker, limit)).await
    }

    pub async fn set_news(
        &self,
        run_id: &str,
        ticker: &str,
        limit: u32,
        news: Value,
    ) -> Result<(), CacheError> {
        self.set(&Self::news_key(run_id, ticker, limit), news).await
    }

    pub async fn get_fundamentals(
        &self,
        run_id: &str,
        ticker: &str,
    ) -> Result<Option<Value>, CacheError> {
        self.get(&Self::fundamentals_key(run_id, ticker)).await
    }

    pub async fn set_fundamentals(
        &self,
        run_id: &str,
        ticker: &str,
        data: Value,
    ) -> Result<(), CacheError> {
        self.set(&Self::fundamentals_key(run_id, ticker), data)
            .await
    }
}
