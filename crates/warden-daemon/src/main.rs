//! Warden Daemon - community moderation service
//!
//! Loads the persisted documents, drives incarceration releases and the
//! stats sweeps, and forwards audited events to the configured channel.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_daemon::{DaemonConfig, DaemonResult, Server};

/// Warden Daemon CLI
#[derive(Parser)]
#[command(name = "wardend")]
#[command(about = "Warden Daemon - community moderation service", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "WARDEN_CONFIG")]
    config: Option<String>,

    /// Directory holding the JSON documents
    #[arg(short, long, env = "WARDEN_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Log level, overrides `logging.level`
    #[arg(long, env = "WARDEN_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "WARDEN_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = DaemonConfig::load(cli.config.as_deref())?;

    // Override with CLI args
    if let Some(state_dir) = cli.state_dir {
        config.storage.state_dir = state_dir;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        guild_id = config.directory.guild_id,
        "Starting wardend"
    );

    let server = Server::new(config).await?;
    server.run().await
}
