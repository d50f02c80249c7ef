// Module: http
// Upload endpoint, progress notification channel and health checks

pub mod error;
pub mod health;
pub mod middleware;
pub mod upload;
pub mod websocket;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use fileshare_core::identity::IdentityProvider;
use fileshare_core::storage::UploadStore;
use fileshare_core::{Config, ConnectionRegistry, ProgressCorrelator};

pub use error::{AppError, AppResult};

/// Per-request limits taken from configuration
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub max_upload_bytes: u64,
    pub channel_capacity: usize,
    pub handshake_timeout: Duration,
}

impl HttpSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_upload_bytes: config.storage.max_upload_bytes,
            channel_capacity: config.progress.channel_capacity,
            handshake_timeout: config.progress.handshake_timeout(),
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub correlator: ProgressCorrelator,
    pub store: Arc<dyn UploadStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub settings: Arc<HttpSettings>,
}

impl AppState {
    /// Wire the state around an existing registry.
    ///
    /// The registry is owned by the server; its sweep is started and stopped
    /// there, not here.
    pub fn new(
        config: &Config,
        registry: ConnectionRegistry,
        store: Arc<dyn UploadStore>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        let correlator =
            ProgressCorrelator::new(registry.clone(), config.progress.sampling_interval());
        Self {
            registry,
            correlator,
            store,
            identity,
            settings: Arc::new(HttpSettings::from_config(config)),
        }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::create_health_router())
        // uploads are bounded by `max_upload_bytes` inside the handler
        .route(
            "/upload-file",
            post(upload::upload_file).layer(DefaultBodyLimit::disable()),
        )
        .route("/ws/progress", get(websocket::progress_channel_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
