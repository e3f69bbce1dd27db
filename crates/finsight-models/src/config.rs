use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: String, value: String },
}

/// Top-level configuration for the memory subsystem.
///
/// Every section has defaults, so an empty file gives a fully in-process setup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FinsightConfig {
    pub session: SessionConfig,
    pub run_cache: RunCacheConfig,
    pub durable: DurableConfig,
    pub semantic: SemanticConfig,
    pub memory: MemoryConfig,
    pub classifier: ClassifierConfig,
}

/// Session cache tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// SQLite file. `None` keeps the tier in process.
    pub db_path: Option<String>,
    pub key_prefix: String,
    pub default_ttl_seconds: u64,
    pub session_ttl_seconds: u64,
    pub history_ttl_seconds: u64,
    pub agent_state_ttl_seconds: u64,
    /// History holds at most `2 * max_turns` messages.
    pub max_turns: usize,
    /// Capacity of the in-process fallback.
    pub max_entries: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            key_prefix: "finsight".to_string(),
            default_ttl_seconds: 3600,
            session_ttl_seconds: 7200,
            history_ttl_seconds: 7200,
            agent_state_ttl_seconds: 1800,
            max_turns: 25,
            max_entries: 10_000,
        }
    }
}

/// Run cache tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunCacheConfig {
    pub db_path: Option<String>,
    pub key_prefix: String,
    /// TTL for tool kinds missing from the TTL table.
    pub default_ttl_seconds: u64,
    pub max_entries: u64,
}

impl Default for RunCacheConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            key_prefix: "run".to_string(),
            default_ttl_seconds: 300,
            max_entries: 10_000,
        }
    }
}

/// Durable store tier. `None` means an in-memory database.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DurableConfig {
    pub db_path: Option<String>,
}

/// Which embedding backend the semantic index uses.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// Local feature hashing. Needs no network.
    #[default]
    Hashing,
    /// An OpenAI-compatible `/embeddings` endpoint.
    #[serde(alias = "openai")]
    Http,
}

impl std::str::FromStr for EmbedderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hashing" => Ok(EmbedderKind::Hashing),
            "http" | "openai" => Ok(EmbedderKind::Http),
            other => Err(format!("unknown embedder: {other}")),
        }
    }
}

/// Semantic index tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SemanticConfig {
    pub db_path: Option<String>,
    pub embedder: EmbedderKind,
    /// Base URL of the embeddings API, without the `/embeddings` suffix.
    pub embedding_base_url: String,
    pub embedding_model: String,
    /// Bearer token for the embeddings API. Usually set from `OPENAI_API_KEY`.
    #[serde(skip_serializing)]
    pub embedding_api_key: Option<String>,
    pub embedding_timeout_seconds: u64,
    /// Length of every embedding vector; must match the model's output.
    pub embedding_dimension: usize,
    pub embedding_cache_ttl_seconds: u64,
    pub embedding_cache_capacity: u64,
    /// RRF constant.
    pub rrf_k: f64,
    /// Candidates pulled from hybrid search before re-ranking.
    pub candidate_limit: usize,
    pub rerank: bool,
    pub chunk_max_chars: usize,
    pub chunk_overlap_chars: usize,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            embedder: EmbedderKind::Hashing,
            embedding_base_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_api_key: None,
            embedding_timeout_seconds: 60,
            embedding_dimension: 384,
            embedding_cache_ttl_seconds: 7 * 24 * 3600,
            embedding_cache_capacity: 10_000,
            rrf_k: 60.0,
            candidate_limit: 20,
            rerank: true,
            chunk_max_chars: 1200,
            chunk_overlap_chars: 150,
        }
    }
}

/// Context aggregation knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    /// Shared deadline for the tier fan-out.
    pub fanout_timeout_ms: u64,
    /// Conversation turns read from the session cache.
    pub history_turns: usize,
    /// Tickers whose summaries are read per query.
    pub ticker_history_limit: usize,
    /// User-context allocation above which ticker summaries are read.
    pub ticker_history_min_budget: u32,
    pub semantic_limit_small: usize,
    pub semantic_limit_large: usize,
    /// Semantic allocation at or above which the large limit applies.
    pub semantic_large_budget: u32,
    /// Tail kept when a conversation summary is indexed.
    pub summary_max_chars: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            fanout_timeout_ms: 200,
            history_turns: 10,
            ticker_history_limit: 3,
            ticker_history_min_budget: 200,
            semantic_limit_small: 5,
            semantic_limit_large: 8,
            semantic_large_budget: 1500,
            summary_max_chars: 8000,
        }
    }
}

/// Classifier settings, including the completion fallback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    pub fallback_enabled: bool,
    /// Stage-1 confidence below which the fallback runs.
    pub fallback_threshold: f32,
    pub fallback_model: String,
    pub fallback_timeout_seconds: u64,
    pub claude_path: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            fallback_enabled: false,
            fallback_threshold: 0.65,
            fallback_model: "claude-3-5-haiku-latest".to_string(),
            fallback_timeout_seconds: 10,
            claude_path: "claude".to_string(),
        }
    }
}

impl FinsightConfig {
    /// Apply environment overrides on top of file values.
    ///
    /// `lookup` returns the value of a variable, if set.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SESSION_DB") {
            self.session.db_path = non_empty(v);
        }
        if let Some(v) = lookup("SESSION_KEY_PREFIX") {
            self.session.key_prefix = v;
        }
        if let Some(v) = parse_var(&lookup, "SESSION_DEFAULT_TTL")? {
            self.session.default_ttl_seconds = v;
        }
        if let Some(v) = parse_var(&lookup, "SESSION_MAX_ENTRIES")? {
            self.session.max_entries = v;
        }

        if let Some(v) = lookup("RUN_CACHE_DB") {
            self.run_cache.db_path = non_empty(v);
        }
        if let Some(v) = lookup("RUN_CACHE_KEY_PREFIX") {
            self.run_cache.key_prefix = v;
        }
        if let Some(v) = parse_var(&lookup, "RUN_CACHE_DEFAULT_TTL")? {
            self.run_cache.default_ttl_seconds = v;
        }
        if let Some(v) = parse_var(&lookup, "RUN_CACHE_MAX_ENTRIES")? {
            self.run_cache.max_entries = v;
        }

        if let Some(v) = lookup("DURABLE_DB") {
            self.durable.db_path = non_empty(v);
        }

        if let Some(v) = lookup("SEMANTIC_DB") {
            self.semantic.db_path = non_empty(v);
        }
        if let Some(v) = parse_var(&lookup, "SEMANTIC_DEFAULT_TTL")? {
            self.semantic.embedding_cache_ttl_seconds = v;
        }
        if let Some(v) = parse_var(&lookup, "FINSIGHT_EMBEDDER")? {
            self.semantic.embedder = v;
        }
        if let Some(v) = lookup("OPENAI_API_KEY") {
            self.semantic.embedding_api_key = non_empty(v);
        }
        if let Some(v) = lookup("OPENAI_EMBED_MODEL") {
            self.semantic.embedding_model = v;
        }
        if let Some(v) = parse_var(&lookup, "EMBEDDING_DIMENSION")? {
            self.semantic.embedding_dimension = v;
        }

        if let Some(v) = parse_var(&lookup, "FINSIGHT_FANOUT_TIMEOUT_MS")? {
            self.memory.fanout_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "FINSIGHT_FALLBACK_THRESHOLD")? {
            self.classifier.fallback_threshold = v;
        }
        if let Some(v) = parse_var(&lookup, "FINSIGHT_FALLBACK_ENABLED")? {
            self.classifier.fallback_enabled = v;
        }
        Ok(())
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_var<F, T>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                var: var.to_string(),
                value,
            }),
    }
}
