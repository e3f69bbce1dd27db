use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cache not available: {0}")]
    Unavailable(String),

    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),
}
