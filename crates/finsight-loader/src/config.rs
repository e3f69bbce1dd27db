use finsight_models::config::FinsightConfig;
use serde::{Deserialize, Serialize};

/// Loader configuration. The tier sections (`[session]`, `[durable]`, ...)
/// are the same ones the `finsight` binary reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub inbox: InboxConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(flatten)]
    pub finsight: FinsightConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxConfig {
    /// Directory scanned for `*.jsonl` document files.
    pub dir: String,
    /// Interval in seconds between inbox scans.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Subdirectory (under `dir`) that ingested files are moved into.
    #[serde(default = "default_processed_dir")]
    pub processed_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Interval in seconds between expired-row sweeps of the SQLite caches.
    #[serde(default = "default_sweep_interval")]
    pub interval_seconds: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_sweep_interval(),
        }
    }
}

fn default_poll_interval() -> u64 {
    30
}
fn default_processed_dir() -> String {
    "processed".to_string()
}
fn default_sweep_interval() -> u64 {
    300
}
