use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use finsight_models::tier::BackendKind;
use rusqlite::Connection;
use tracing::warn;

use crate::error::StoreError;

/// Shared SQLite connection driven from async code via the blocking pool.
#[derive(Clone)]
pub(crate) struct Db {
    conn: Arc<Mutex<Connection>>,
    backend: BackendKind,
}

impl Db {
    pub(crate) fn open(path: &str, ddl: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(ddl)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            backend: BackendKind::Sqlite,
        })
    }

    pub(crate) fn open_in_memory(ddl: &str) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(ddl)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            backend: BackendKind::InProcess,
        })
    }

    /// Open the configured file, or an in-memory database when no file is
    /// configured or the file cannot be opened. Never retries the file.
    pub(crate) fn connect(tier: &str, path: Option<&str>, ddl: &str) -> Result<Self, StoreError> {
        match path {
            Some(path) => match Self::open(path, ddl) {
                Ok(db) => Ok(db),
                Err(e) => {
                    warn!(
                        tier,
                        path,
                        error = %e,
                        "Backing store unavailable, falling back to in-process database"
                    );
                    Self::open_in_memory(ddl)
                }
            },
            None => Self::open_in_memory(ddl),
        }
    }

    pub(crate) fn backend(&self) -> BackendKind {
        self.backend
    }

    pub(crate) async fn run_blocking<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("SQLite mutex poisoned: {e}")))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("blocking task failed: {e}")))?
    }
}

/// Fixed-width UTC timestamp so text ordering matches time ordering.
pub(crate) fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(table: &'static str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            reason: format!("bad timestamp {raw:?}: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_sort_lexically() {
        let early = Utc::now();
        let late = early + chrono::Duration::milliseconds(1500);
        assert!(format_ts(early) < format_ts(late));
        assert_eq!(
            parse_ts("t", &format_ts(early)).unwrap().timestamp_micros(),
            early.timestamp_micros()
        );
    }

    #[test]
    fn connect_falls_back_in_memory() {
        let db = Db::connect(
            "durable_store",
            Some("/nonexistent/dir/x.db"),
            "CREATE TABLE t (x INTEGER);",
        )
        .unwrap();
        assert_eq!(db.backend(), BackendKind::InProcess);
    }
}
