//! Mock tiers and completers plus an in-process harness for tests.
//!
//! The mocks stand in for tiers that are slow, broken or need counting, so
//! degradation and caching behavior can be checked without real backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use finsight_cache::{CacheError, KvStore, MemoryKv, RunCache, SessionCache};
use finsight_models::config::{MemoryConfig, RunCacheConfig, SessionConfig};
use finsight_models::profile::{TickerDecisionSummary, UserProfileSummary};
use finsight_models::semantic::SemanticHit;
use finsight_models::tier::BackendKind;
use finsight_store::{DurableStore, HashingEmbedder, SearchFilter, SemanticIndex, StoreError};
use serde_json::Value;

use crate::aggregator::ContextAggregator;
use crate::classifier::Classifier;
use crate::completion::{CompletionRequest, Completer};
use crate::error::MemoryError;
use crate::ingest::Ingestor;
use crate::tiers::{ProfileTier, SemanticTier};

/// Fan-out deadline used by the harness; generous so only deliberately slow
/// mocks time out.
pub const HARNESS_FANOUT_TIMEOUT_MS: u64 = 2_000;

/// Every tier backed by in-process storage.
pub struct Harness {
    pub session: Arc<SessionCache>,
    pub run_cache: Arc<RunCache>,
    pub durable: Arc<DurableStore>,
    pub semantic: Arc<SemanticIndex>,
    pub config: MemoryConfig,
}

impl Harness {
    pub fn new() -> Result<Self, MemoryError> {
        Self::with_session_store(Arc::new(MemoryKv::new(10_000)))
    }

    /// Harness whose session cache runs on `store`.
    pub fn with_session_store(store: Arc<dyn KvStore>) -> Result<Self, MemoryError> {
        let embedder = Arc::new(HashingEmbedder::new(64));
        Ok(Self {
            session: Arc::new(SessionCache::new(store, SessionConfig::default())),
            run_cache: Arc::new(RunCache::new(
                Arc::new(MemoryKv::new(10_000)),
                RunCacheConfig::default(),
            )),
            durable: Arc::new(DurableStore::open_in_memory()?),
            semantic: Arc::new(SemanticIndex::open_in_memory(embedder)?),
            config: MemoryConfig {
                fanout_timeout_ms: HARNESS_FANOUT_TIMEOUT_MS,
                ..MemoryConfig::default()
            },
        })
    }

    /// Aggregator over the harness tiers with the stage-1 classifier.
    pub fn aggregator(&self) -> ContextAggregator {
        self.aggregator_with(
            self.durable.clone(),
            self.semantic.clone(),
            self.config.clone(),
        )
    }

    /// Aggregator with replacement profile and semantic tiers.
    pub fn aggregator_with(
        &self,
        profiles: Arc<dyn ProfileTier>,
        semantic: Arc<dyn SemanticTier>,
        config: MemoryConfig,
    ) -> ContextAggregator {
        ContextAggregator::new(
            Arc::new(Classifier::deterministic()),
            self.session.clone(),
            self.run_cache.clone(),
            profiles,
            semantic,
            config,
        )
    }

    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(
            self.session.clone(),
            self.run_cache.clone(),
            self.durable.clone(),
            self.semantic.clone(),
            self.config.clone(),
        )
    }
}

/// Completer returning a fixed reply and counting calls.
pub struct StaticCompleter {
    reply: String,
    calls: AtomicUsize,
}

impl StaticCompleter {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Completer for StaticCompleter {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, MemoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }
}

/// Completer that always errors.
pub struct FailingCompleter;

#[async_trait]
impl Completer for FailingCompleter {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, MemoryError> {
        Err(MemoryError::Completion("completion backend offline".to_string()))
    }
}

/// Semantic tier that always errors.
pub struct FailingSemantic;

#[async_trait]
impl SemanticTier for FailingSemantic {
    async fn retrieve(
        &self,
        _query: &str,
        _must: Option<&SearchFilter>,
        _limit: usize,
    ) -> Result<Vec<SemanticHit>, MemoryError> {
        Err(StoreError::Unavailable("vector index unreachable".to_string()).into())
    }
}

/// Semantic tier that answers after a delay.
pub struct SlowSemantic {
    pub delay: Duration,
    pub hits: Vec<SemanticHit>,
}

#[async_trait]
impl SemanticTier for SlowSemantic {
    async fn retrieve(
        &self,
        _query: &str,
        _must: Option<&SearchFilter>,
        limit: usize,
    ) -> Result<Vec<SemanticHit>, MemoryError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.hits.iter().take(limit).cloned().collect())
    }
}

/// Profile tier that answers "unknown user" after a delay.
pub struct SlowProfiles {
    pub delay: Duration,
}

#[async_trait]
impl ProfileTier for SlowProfiles {
    async fn get_user_version(&self, _user_id: &str) -> Result<u64, MemoryError> {
        tokio::time::sleep(self.delay).await;
        Ok(0)
    }

    async fn get_user_summary(
        &self,
        _user_id: &str,
    ) -> Result<Option<UserProfileSummary>, MemoryError> {
        tokio::time::sleep(self.delay).await;
        Ok(None)
    }

    async fn get_ticker_summary(
        &self,
        _user_id: &str,
        _ticker: &str,
    ) -> Result<Option<TickerDecisionSummary>, MemoryError> {
        tokio::time::sleep(self.delay).await;
        Ok(None)
    }
}

/// Durable-store profile reads that count full profile loads.
pub struct CountingProfiles {
    inner: Arc<DurableStore>,
    summary_reads: AtomicUsize,
}

impl CountingProfiles {
    pub fn new(inner: Arc<DurableStore>) -> Self {
        Self {
            inner,
            summary_reads: AtomicUsize::new(0),
        }
    }

    pub fn summary_reads(&self) -> usize {
        self.summary_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProfileTier for CountingProfiles {
    async fn get_user_version(&self, user_id: &str) -> Result<u64, MemoryError> {
        Ok(self.inner.get_user_version(user_id).await?)
    }

    async fn get_user_summary(
        &self,
        user_id: &str,
    ) -> Result<Option<UserProfileSummary>, MemoryError> {
        self.summary_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.inner.get_user_summary(user_id).await?)
    }

    async fn get_ticker_summary(
        &self,
        user_id: &str,
        ticker: &str,
    ) -> Result<Option<TickerDecisionSummary>, MemoryError> {
        Ok(self.inner.get_ticker_summary(user_id, ticker).await?)
    }
}

/// Key/value store whose every operation fails.
pub struct FailingKv;

impl FailingKv {
    fn down<T>() -> Result<T, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

#[async_trait]
impl KvStore for FailingKv {
    async fn get(&self, _key: &str) -> Result<Option<Value>, CacheError> {
        Self::down()
    }

    async fn set(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<(), CacheError> {
        Self::down()
    }

    async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
        Self::down()
    }

    async fn delete_prefix(&self, _prefix: &str) -> Result<u64, CacheError> {
        Self::down()
    }

    async fn push_capped(
        &self,
        _key: &str,
        _item: Value,
        _cap: usize,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        Self::down()
    }

    fn backend(&self) -> BackendKind {
        BackendKind::InProcess
    }
}
