//! Server lifecycle management
//!
//! Starts the idle-channel sweep and the HTTP server, then tears both down
//! in order when a shutdown signal arrives.

use std::net::SocketAddr;
use tracing::{error, info};

use fileshare_api::http::{create_router, AppState};
use fileshare_core::{Config, ConnectionRegistry};

pub struct FileShareServer {
    config: Config,
    registry: ConnectionRegistry,
    state: AppState,
}

impl FileShareServer {
    pub const fn new(config: Config, registry: ConnectionRegistry, state: AppState) -> Self {
        Self {
            config,
            registry,
            state,
        }
    }

    /// Serve until a shutdown signal is received
    pub async fn start(self) -> anyhow::Result<()> {
        let http_addr: SocketAddr = self
            .config
            .http_address()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{}': {e}", self.config.http_address()))?;

        let listener = tokio::net::TcpListener::bind(http_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_addr}: {e}"))?;

        let sweeper = self.registry.start();

        info!("HTTP server listening on {}", http_addr);
        let result = axum::serve(listener, create_router(self.state.clone()))
            .with_graceful_shutdown(shutdown_signal())
            .await;

        self.shutdown().await;
        if let Err(e) = sweeper.await {
            error!("Idle channel sweep task failed: {}", e);
        }

        result.map_err(|e| anyhow::anyhow!("HTTP server error: {e}"))
    }

    async fn shutdown(&self) {
        info!("Shutting down file share server...");

        self.registry.stop();
        let closed = self.registry.terminate_all();
        if closed > 0 {
            info!("Closed {} open notification channel(s)", closed);
        }

        // Let socket tasks flush their close frames
        tokio::task::yield_now().await;
        info!("Shutdown complete");
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
