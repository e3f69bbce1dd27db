use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Completion error: {0}")]
    Completion(String),

    #[error("Classifier reply parse error: {0}")]
    Parse(String),

    #[error("Completion timed out after {0} seconds")]
    Timeout(u64),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Cache error: {0}")]
    Cache(#[from] finsight_cache::CacheError),

    #[error("Store error: {0}")]
    Store(#[from] finsight_store::StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
