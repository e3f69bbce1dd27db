use finsight_cache::SqliteKv;
use finsight_models::config::FinsightConfig;
use finsight_models::tier::TierId;

use crate::error::LoaderError;

/// Deletes expired rows from the SQLite-backed cache tiers.
///
/// In-process tiers expire on their own and are not swept.
pub struct Sweeper {
    stores: Vec<(TierId, SqliteKv)>,
}

impl Sweeper {
    pub fn new(stores: Vec<(TierId, SqliteKv)>) -> Self {
        Self { stores }
    }

    /// Open the session and run cache databases that have a path configured.
    pub fn from_config(config: &FinsightConfig) -> Result<Self, LoaderError> {
        let mut stores = Vec::new();
        let paths = [
            (TierId::SessionCache, config.session.db_path.as_deref()),
            (TierId::RunCache, config.run_cache.db_path.as_deref()),
        ];
        for (tier, path) in paths {
            if let Some(path) = path {
                stores.push((tier, SqliteKv::open(path)?));
            }
        }
        Ok(Self { stores })
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    /// One pass over every store. Failures are logged per tier. Returns the
    /// number of rows deleted.
    pub async fn sweep_once(&self) -> usize {
        let mut total = 0;
        for (tier, store) in &self.stores {
            match store.expire_stale().await {
                Ok(deleted) if deleted > 0 => {
                    tracing::info!(tier = %tier, deleted, "Cleaned up stale cache entries");
                    total += deleted;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(tier = %tier, error = %e, "Stale cleanup failed");
                }
            }
        }
        total
    }
}
