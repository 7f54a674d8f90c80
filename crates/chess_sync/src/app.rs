//! Application lifecycle: configuration, startup and graceful shutdown.

use crate::cli::Args;
use crate::config::AppConfig;
use crate::logging::setup_logging;
use crate::signals::wait_for_shutdown_signal;
use crate::transport;
use anyhow::{anyhow, Context};
use room_sync::{LedgerClient, RoomSyncService};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// The chess sync server process.
pub struct Application {
    config: AppConfig,
    service: Arc<RoomSyncService>,
}

impl Application {
    /// Loads the configuration, applies CLI overrides, validates it, and
    /// initializes logging and the synchronization service.
    pub async fn new(args: Args) -> anyhow::Result<Self> {
        let mut config = AppConfig::load_from_file(&args.config)
            .await
            .with_context(|| format!("loading {}", args.config.display()))?;
        args.apply_to(&mut config);

        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {e}"))?;

        setup_logging(&config.logging)?;
        info!("🔧 Logging initialized with level: {}", config.logging.level);

        let ledger = Arc::new(LedgerClient::new(
            config.ledger.rpc_url.clone(),
            config.ledger.program_address.clone(),
        ));
        let service = Arc::new(RoomSyncService::new(config.to_sync_config(), ledger));

        info!("🚀 Chess Sync Server v{}", env!("CARGO_PKG_VERSION"));
        info!("📂 Config: {}", args.config.display());

        Ok(Self { config, service })
    }

    pub fn service(&self) -> &Arc<RoomSyncService> {
        &self.service
    }

    /// Runs until SIGINT/SIGTERM, then shuts everything down in order.
    pub async fn run(self) -> anyhow::Result<()> {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!("  👥 Max connections: {}", self.config.server.max_connections);
        info!("  ⛓️ Ledger: {}", self.config.ledger.rpc_url);
        info!(
            "  ⏱️ Reconcile every {}ms, lobby sweep every {}ms, fetch timeout {}ms",
            self.config.sync.reconcile_interval_ms,
            self.config.sync.lobby_sweep_interval_ms,
            self.config.sync.fetch_timeout_ms
        );

        self.service.start().await?;

        let listener = TcpListener::bind(self.config.bind_address()?).await?;
        let (shutdown_tx, _) = broadcast::channel(1);

        let server_handle = tokio::spawn(transport::serve(
            listener,
            Arc::clone(&self.service),
            self.config.server.max_connections,
            shutdown_tx.subscribe(),
        ));

        let monitoring_handle = {
            let service = Arc::clone(&self.service);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(HEALTH_LOG_INTERVAL);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    info!(
                        "📊 System Health - {} sessions | {} rooms | {} open games",
                        service.session_count(),
                        service.room_count(),
                        service.list_available_keys().len()
                    );
                }
            })
        };

        info!("✅ Chess sync server is running. Press Ctrl+C to stop.");
        match wait_for_shutdown_signal().await {
            Ok(signal) => info!(
                "📡 {} received, closing {} session(s)",
                signal,
                self.service.session_count()
            ),
            Err(e) => error!("Signal handler failed: {}", e),
        }

        info!("🛑 Shutting down...");
        let _ = shutdown_tx.send(());
        monitoring_handle.abort();
        match server_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("❌ Server error: {:?}", e),
            Err(e) => error!("❌ Server task failed: {}", e),
        }
        self.service.shutdown().await;

        info!("👋 Chess sync server stopped");
        Ok(())
    }
}
