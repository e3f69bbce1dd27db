use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the four independently addressable storage tiers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TierId {
    /// Conversational turns, session blobs and versioned user snapshots.
    SessionCache,
    /// Per-run tool result deduplication.
    RunCache,
    /// Decision/conversation logs plus write-time summaries.
    DurableStore,
    /// Embedding-based nearest-neighbour search.
    SemanticIndex,
}

impl TierId {
    pub const ALL: [TierId; 4] = [
        TierId::SessionCache,
        TierId::RunCache,
        TierId::DurableStore,
        TierId::SemanticIndex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TierId::SessionCache => "session_cache",
            TierId::RunCache => "run_cache",
            TierId::DurableStore => "durable_store",
            TierId::SemanticIndex => "semantic_index",
        }
    }
}

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which engine is actually serving a tier after construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// File-backed SQLite database shared across processes.
    Sqlite,
    /// Process-local fallback; contents vanish with the process.
    InProcess,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Sqlite => f.write_str("sqlite"),
            BackendKind::InProcess => f.write_str("in_process"),
        }
    }
}

/// How a single tier fetch ended during context aggregation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TierStatus {
    /// Completed and returned data.
    Hit,
    /// Completed with nothing to contribute.
    Absent,
    /// Raised an error; the matching context fields stay empty.
    Failed { reason: String },
    /// Still running when the shared deadline elapsed.
    TimedOut,
    /// Not attempted (no run id, zero budget, ...).
    Skipped { reason: String },
}

impl TierStatus {
    /// Whether the tier answered inside the deadline without error.
    pub fn completed(&self) -> bool {
        matches!(self, TierStatus::Hit | TierStatus::Absent)
    }
}

/// Per-tier diagnostics attached to every aggregated context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierReport {
    pub tier: TierId,
    #[serde(flatten)]
    pub status: TierStatus,
    pub elapsed_ms: u64,
}
