//! FinSight memory subsystem.
//!
//! Query-aware context retrieval over four storage tiers: a session cache,
//! a per-run tool cache, a durable decision store and a semantic index.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use finsight::models::config::FinsightConfig;
//! use finsight::memory::ContextRequest;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let memory = finsight::build_memory(&FinsightConfig::default())?;
//! let context = memory
//!     .aggregator
//!     .get_context(&ContextRequest::new("What's the price of AAPL?", "s1", "u1"))
//!     .await?;
//! println!("{}", context.to_prompt_context());
//! # Ok(())
//! # }
//! ```

pub use finsight_cache as cache;
pub use finsight_memory as memory;
pub use finsight_models as models;
pub use finsight_store as store;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use finsight_cache::{connect_kv, RunCache, SessionCache};
use finsight_memory::{ClaudeCliCompleter, Classifier, Completer, ContextAggregator, Ingestor};
use finsight_models::config::{EmbedderKind, FinsightConfig, SemanticConfig};
use finsight_models::tier::{BackendKind, TierId};
use finsight_store::{
    CachedEmbedder, DurableStore, Embedder, HashingEmbedder, HttpEmbedder, SemanticIndex,
};
use tracing::{info, warn};

/// The read and write halves of the memory subsystem over shared tiers.
pub struct Memory {
    pub aggregator: ContextAggregator,
    pub ingestor: Ingestor,
    /// Engine actually serving each tier after connect-or-fallback.
    pub backends: BTreeMap<TierId, BackendKind>,
}

/// Load configuration from an optional TOML file, then apply environment
/// overrides from the process environment.
pub fn load_config(path: Option<&str>) -> Result<FinsightConfig, anyhow::Error> {
    let mut config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config: {path}"))?;
            toml::from_str(&raw).with_context(|| format!("Failed to parse config: {path}"))?
        }
        None => FinsightConfig::default(),
    };
    config
        .apply_env_overrides(|var| std::env::var(var).ok())
        .context("Invalid environment override")?;
    Ok(config)
}

/// The configured embedder behind an in-process cache.
pub fn build_embedder(config: &SemanticConfig) -> Result<Arc<dyn Embedder>, anyhow::Error> {
    let inner: Arc<dyn Embedder> = match config.embedder {
        EmbedderKind::Hashing => Arc::new(HashingEmbedder::new(config.embedding_dimension)),
        EmbedderKind::Http => {
            if config.embedding_api_key.is_none() {
                warn!(
                    base_url = %config.embedding_base_url,
                    "No embeddings API key configured, sending unauthenticated requests"
                );
            }
            Arc::new(HttpEmbedder::from_config(config)?)
        }
    };
    info!(
        embedder = ?config.embedder,
        model = %config.embedding_model,
        dimension = config.embedding_dimension,
        "Embedder ready"
    );
    Ok(Arc::new(CachedEmbedder::new(
        inner,
        config.embedding_cache_capacity,
        Duration::from_secs(config.embedding_cache_ttl_seconds),
    )))
}

/// Construct every tier and wire the aggregator and ingestor over them.
///
/// Tiers whose database cannot be opened fall back to in-process storage;
/// only failures of that fallback are errors.
pub fn build_memory(config: &FinsightConfig) -> Result<Memory, anyhow::Error> {
    let session = Arc::new(SessionCache::new(
        connect_kv(
            TierId::SessionCache.as_str(),
            config.session.db_path.as_deref(),
            config.session.max_entries,
        ),
        config.session.clone(),
    ));
    let run_cache = Arc::new(RunCache::new(
        connect_kv(
            TierId::RunCache.as_str(),
            config.run_cache.db_path.as_deref(),
            config.run_cache.max_entries,
        ),
        config.run_cache.clone(),
    ));
    let durable =
        Arc::new(DurableStore::connect(&config.durable).context("Failed to open durable store")?);

    let embedder = build_embedder(&config.semantic).context("Failed to build embedder")?;
    let semantic = Arc::new(
        SemanticIndex::connect(&config.semantic, embedder)
            .context("Failed to open semantic index")?,
    );

    let completer: Option<Arc<dyn Completer>> = if config.classifier.fallback_enabled {
        Some(Arc::new(ClaudeCliCompleter::from_config(&config.classifier)))
    } else {
        None
    };
    let classifier = Arc::new(Classifier::new(config.classifier.clone(), completer));

    let backends = BTreeMap::from([
        (TierId::SessionCache, session.backend()),
        (TierId::RunCache, run_cache.backend()),
        (TierId::DurableStore, durable.backend()),
        (TierId::SemanticIndex, semantic.backend()),
    ]);
    info!(
        backends = ?backends,
        fallback_enabled = config.classifier.fallback_enabled,
        fanout_timeout_ms = config.memory.fanout_timeout_ms,
        "Memory subsystem ready"
    );

    let aggregator = ContextAggregator::new(
        classifier,
        session.clone(),
        run_cache.clone(),
        durable.clone(),
        semantic.clone(),
        config.memory.clone(),
    );
    let ingestor = Ingestor::new(session, run_cache, durable, semantic, config.memory.clone());

    Ok(Memory {
        aggregator,
        ingestor,
        backends,
    })
}
