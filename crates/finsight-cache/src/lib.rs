pub mod error;
pub mod memory;
pub mod run_cache;
pub mod session;
pub mod sqlite;
pub mod store;

pub use error::CacheError;
pub use memory::MemoryKv;
pub use run_cache::{params_hash, ttl_for_tool, RunCache, RunCacheKey};
pub use session::SessionCache;
pub use sqlite::SqliteKv;
pub use store::{connect_kv, KvStore};
