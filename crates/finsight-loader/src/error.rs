use finsight_cache::CacheError;
use finsight_memory::MemoryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
