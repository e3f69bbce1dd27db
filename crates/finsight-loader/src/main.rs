use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use finsight_loader::config::LoaderConfig;
use finsight_loader::daemon::Daemon;

#[derive(Parser, Debug)]
#[command(
    name = "finsight-loader",
    about = "FinSight loader daemon - ingests inbox documents and sweeps expired cache rows"
)]
struct Cli {
    /// Path to loader configuration file
    #[arg(short, long, default_value = "config/finsight-loader.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config)
        .with_context(|| format!("Failed to read config: {}", cli.config))?;
    let mut config: LoaderConfig =
        toml::from_str(&config_str).with_context(|| "Failed to parse loader config")?;
    config
        .finsight
        .apply_env_overrides(|var| std::env::var(var).ok())
        .context("Invalid environment override")?;

    let daemon = Daemon::from_config(config).context("Failed to start loader")?;
    let cancel = daemon.cancel_token();

    // Handle shutdown signals
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Received shutdown signal");
        cancel.cancel();
    });

    daemon
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Daemon error: {e}"))?;

    Ok(())
}
