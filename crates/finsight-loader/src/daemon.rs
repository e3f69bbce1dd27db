use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use finsight_memory::Ingestor;
use tokio_util::sync::CancellationToken;

use crate::config::LoaderConfig;
use crate::error::LoaderError;
use crate::inbox;
use crate::sweep::Sweeper;

/// The loader daemon. Runs periodic inbox ingestion into the semantic index
/// and expired-row sweeping of the SQLite caches.
pub struct Daemon {
    config: LoaderConfig,
    ingestor: Arc<Ingestor>,
    sweeper: Arc<Sweeper>,
    cancel: CancellationToken,
}

impl Daemon {
    pub fn new(config: LoaderConfig, ingestor: Ingestor, sweeper: Sweeper) -> Self {
        Self {
            config,
            ingestor: Arc::new(ingestor),
            sweeper: Arc::new(sweeper),
            cancel: CancellationToken::new(),
        }
    }

    /// Build the memory tiers and sweeper from configuration.
    pub fn from_config(config: LoaderConfig) -> Result<Self, LoaderError> {
        let memory = finsight::build_memory(&config.finsight)
            .map_err(|e| LoaderError::Config(format!("{e:#}")))?;
        let sweeper = Sweeper::from_config(&config.finsight)?;
        Ok(Self::new(config, memory.ingestor, sweeper))
    }

    /// Returns a CancellationToken that can be used to trigger shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the daemon until cancelled.
    pub async fn run(&self) -> Result<(), LoaderError> {
        tracing::info!("FinSight loader daemon starting");

        let inbox_dir = PathBuf::from(&self.config.inbox.dir);
        tokio::fs::create_dir_all(&inbox_dir).await?;

        let mut join_set = tokio::task::JoinSet::new();

        // Task 1: Inbox ingestion
        {
            let ingestor = self.ingestor.clone();
            let processed_dir = self.config.inbox.processed_dir.clone();
            let interval = Duration::from_secs(self.config.inbox.poll_interval_seconds);
            let cancel = self.cancel.clone();
            join_set.spawn(async move {
                inbox_loop(ingestor, inbox_dir, processed_dir, interval, cancel).await;
            });
        }

        // Task 2: Stale entry cleanup
        if self.sweeper.is_empty() {
            tracing::info!("No SQLite cache tiers configured, sweeping disabled");
        } else {
            let sweeper = self.sweeper.clone();
            let interval = Duration::from_secs(self.config.sweep.interval_seconds);
            let cancel = self.cancel.clone();
            join_set.spawn(async move {
                cleanup_loop(sweeper, interval, cancel).await;
            });
        }

        tracing::info!("All loader tasks started");

        // Wait for all tasks to complete (they run until cancelled)
        while join_set.join_next().await.is_some() {}

        tracing::info!("FinSight loader daemon stopped");
        Ok(())
    }
}

/// Periodically ingest pending inbox files.
pub async fn inbox_loop(
    ingestor: Arc<Ingestor>,
    dir: PathBuf,
    processed_dir: String,
    interval: Duration,
    cancel: CancellationToken,
) {
    // Run immediately on startup
    run_inbox_scan(&ingestor, &dir, &processed_dir).await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Inbox loop shutting down");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                run_inbox_scan(&ingestor, &dir, &processed_dir).await;
            }
        }
    }
}

async fn run_inbox_scan(ingestor: &Ingestor, dir: &std::path::Path, processed_dir: &str) {
    match inbox::scan_inbox(ingestor, dir, processed_dir).await {
        Ok(scan) if scan.files > 0 => {
            tracing::info!(
                files = scan.files,
                documents = scan.documents,
                chunks = scan.chunks,
                rejected = scan.rejected,
                "Inbox scan complete"
            );
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(dir = %dir.display(), error = %e, "Inbox scan failed");
        }
    }
}

/// Periodically clean up expired cache entries.
pub async fn cleanup_loop(sweeper: Arc<Sweeper>, interval: Duration, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Cleanup loop shutting down");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                sweeper.sweep_once().await;
            }
        }
    }
}
