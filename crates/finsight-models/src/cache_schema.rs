/// Key/value table shared by the SQLite-backed session and run caches.
///
/// ```sql
/// CREATE TABLE IF NOT EXISTS kv_entries (
///     key         TEXT PRIMARY KEY,
///     value_json  TEXT NOT NULL,
///     expires_at  INTEGER NOT NULL,   -- unix epoch milliseconds
///     created_at  TEXT NOT NULL,
///     updated_at  TEXT NOT NULL
/// );
/// ```
pub const KV_TABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS kv_entries (
    key         TEXT PRIMARY KEY,
    value_json  TEXT NOT NULL,
    expires_at  INTEGER NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_kv_expires ON kv_entries(expires_at);
";

/// Durable store: two append-only logs plus two write-time summary tables.
pub const DURABLE_DDL: &str = "\
CREATE TABLE IF NOT EXISTS decision_log (
    id               TEXT PRIMARY KEY,
    user_id          TEXT NOT NULL,
    session_id       TEXT,
    ticker           TEXT NOT NULL,
    query            TEXT NOT NULL,
    decision_json    TEXT NOT NULL,
    reports_json     TEXT NOT NULL DEFAULT '[]',
    risk_json        TEXT,
    created_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_decision_log_user ON decision_log(user_id);
CREATE INDEX IF NOT EXISTS idx_decision_log_ticker ON decision_log(ticker);

CREATE TABLE IF NOT EXISTS conversation_log (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id          TEXT NOT NULL,
    session_id       TEXT,
    role             TEXT NOT NULL,
    content          TEXT NOT NULL,
    metadata_json    TEXT NOT NULL DEFAULT '{}',
    created_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_conversation_log_user ON conversation_log(user_id);

CREATE TABLE IF NOT EXISTS user_profile_summary (
    user_id            TEXT PRIMARY KEY,
    risk_tolerance     TEXT,
    preferred_sectors  TEXT NOT NULL DEFAULT '[]',
    avg_position_size  TEXT,
    trading_style      TEXT,
    total_decisions    INTEGER NOT NULL DEFAULT 0,
    last_active        TEXT,
    version            INTEGER NOT NULL DEFAULT 1,
    updated_at         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_ticker_summary (
    user_id             TEXT NOT NULL,
    ticker              TEXT NOT NULL,
    total_analyses      INTEGER NOT NULL DEFAULT 0,
    last_decision       TEXT,
    last_analysis_date  TEXT,
    decisions_history   TEXT NOT NULL DEFAULT '[]',
    avg_sentiment       REAL,
    notes               TEXT,
    updated_at          TEXT NOT NULL,
    PRIMARY KEY (user_id, ticker)
);
CREATE INDEX IF NOT EXISTS idx_ticker_summary_user ON user_ticker_summary(user_id);
";

/// Semantic index points. Dense vectors are little-endian f32 blobs.
pub const SEMANTIC_DDL: &str = "\
CREATE TABLE IF NOT EXISTS semantic_chunks (
    id           TEXT PRIMARY KEY,
    dense        BLOB NOT NULL,
    sparse_json  TEXT NOT NULL,
    text         TEXT NOT NULL,
    symbol       TEXT,
    kind         TEXT NOT NULL,
    source       TEXT,
    date         TEXT,
    user_id      TEXT,
    created_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_semantic_symbol ON semantic_chunks(symbol);
CREATE INDEX IF NOT EXISTS idx_semantic_kind ON semantic_chunks(kind);
";

/// Key shapes for the session and run caches.
///
/// - History list: `{prefix}:history:{session_id}`
/// - Session blob: `{prefix}:session:{session_id}`
/// - Conversation summary: `{prefix}:context_summary:{session_id}`
/// - Agent state: `{prefix}:agent_state:{session_id}:{agent}`
/// - User snapshot: `{prefix}:user_snapshot:{user_id}`
/// - Run entry: `{prefix}:{run_id}:{tool}[:{ticker}][:{params_hash}]`
pub mod key_patterns {
    pub fn history(prefix: &str, session_id: &str) -> String {
        format!("{prefix}:history:{session_id}")
    }

    pub fn session(prefix: &str, session_id: &str) -> String {
        format!("{prefix}:session:{session_id}")
    }

    pub fn context_summary(prefix: &str, session_id: &str) -> String {
        format!("{prefix}:context_summary:{session_id}")
    }

    pub fn agent_state(prefix: &str, session_id: &str, agent: &str) -> String {
        format!("{prefix}:agent_state:{session_id}:{agent}")
    }

    pub fn user_snapshot(prefix: &str, user_id: &str) -> String {
        format!("{prefix}:user_snapshot:{user_id}")
    }

    pub fn run(
        prefix: &str,
        run_id: &str,
        tool: &str,
        ticker: Option<&str>,
        params_hash: Option<&str>,
    ) -> String {
        let mut key = format!("{prefix}:{run_id}:{tool}");
        if let Some(ticker) = ticker {
            key.push(':');
            key.push_str(ticker);
        }
        if let Some(hash) = params_hash {
            key.push(':');
            key.push_str(hash);
        }
        key
    }

    /// Prefix covering every entry of one run, including the trailing separator.
    pub fn run_prefix(prefix: &str, run_id: &str) -> String {
        format!("{prefix}:{run_id}:")
    }
}
