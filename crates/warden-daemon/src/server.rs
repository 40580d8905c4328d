//! Daemon setup and lifecycle management

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use warden_engine::{Directory, Engine, SystemClock};
use warden_store::JsonFileStore;
use warden_types::{ChannelId, WardenEventEnvelope};

use crate::config::DaemonConfig;
use crate::directory::HttpDirectory;
use crate::error::{DaemonError, DaemonResult};
use crate::scheduler::{Scheduler, SweepIntervals};

/// Warden daemon
pub struct Server {
    config: DaemonConfig,
    engine: Arc<Engine>,
    directory: Arc<dyn Directory>,
}

impl Server {
    /// Wire the directory client, the document store and the engine.
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let token = std::env::var(&config.directory.token_env).map_err(|_| {
            DaemonError::Config(format!(
                "bot token variable {} is not set",
                config.directory.token_env
            ))
        })?;
        let directory: Arc<dyn Directory> =
            Arc::new(HttpDirectory::new(&config.directory, token)?);
        let store = Arc::new(JsonFileStore::open(&config.storage.state_dir).await?);

        Ok(Self::with_parts(config, directory, store))
    }

    /// Build a server around an existing directory and store.
    pub fn with_parts(
        config: DaemonConfig,
        directory: Arc<dyn Directory>,
        store: Arc<dyn warden_store::DocumentStore>,
    ) -> Self {
        let engine = Arc::new(Engine::new(
            config.engine.clone(),
            directory.clone(),
            store,
            Arc::new(SystemClock),
        ));
        Self {
            config,
            engine,
            directory,
        }
    }

    pub fn engine(&self) -> Arc<Engine> {
        self.engine.clone()
    }

    /// Run until SIGINT or SIGTERM.
    pub async fn run(self) -> DaemonResult<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `shutdown` resolves, then stop the loops, flush stats and
    /// drain pending releases.
    pub async fn run_until(self, shutdown: impl std::future::Future<Output = ()>) -> DaemonResult<()> {
        self.engine.load().await?;

        let forwarder = self
            .config
            .logging
            .audit_channel
            .map(|channel| spawn_audit_forwarder(self.engine.subscribe(), self.directory.clone(), channel));

        let scheduler = Scheduler::new(
            self.engine.clone(),
            SweepIntervals::from_config(&self.config.engine),
        );
        scheduler.start().await;
        tracing::info!(
            state_dir = %self.config.storage.state_dir.display(),
            guild_id = self.config.directory.guild_id,
            "Warden daemon running"
        );

        shutdown.await;
        tracing::info!("Warden daemon shutting down");

        scheduler.stop().await;
        let report = self.engine.shutdown().await;
        if report.releases_abandoned > 0 {
            tracing::warn!(
                abandoned = report.releases_abandoned,
                "Pending releases left for the next start"
            );
        }
        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
        Ok(())
    }
}

/// Post audited events to `channel`. Delivery failures are logged only.
fn spawn_audit_forwarder(
    mut events: broadcast::Receiver<WardenEventEnvelope>,
    directory: Arc<dyn Directory>,
    channel: ChannelId,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(envelope) => {
                    if !envelope.event.is_audited() {
                        continue;
                    }
                    let line = envelope.event.to_string();
                    if let Err(e) = directory.send_message(channel, &line).await {
                        tracing::warn!(
                            channel_id = %channel,
                            event_id = %envelope.id,
                            error = %e,
                            "Audit log delivery failed"
                        );
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Audit forwarder fell behind, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
