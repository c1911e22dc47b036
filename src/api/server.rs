use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    acknowledge, check, health_check, ingest_samples, list_active, list_historical,
    list_thresholds, replace_thresholds, warning_stats, AppState,
};
use crate::alerts::{NotifyConfig, Notifier};
use crate::data::{default_thresholds, ThresholdConfig};
use crate::detector::ThresholdRegistry;
use crate::storage::{EventStore, FileEventStore, MemoryEventStore};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Event log directory; `None` keeps history in memory only
    pub data_dir: Option<PathBuf>,
    pub thresholds: Vec<ThresholdConfig>,
    pub drain_interval: Duration,
    pub queue_capacity: usize,
    pub notify: NotifyConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            data_dir: Some(PathBuf::from("./gridwatch_data")),
            thresholds: default_thresholds(),
            drain_interval: Duration::from_millis(1000),
            queue_capacity: 4096,
            notify: NotifyConfig::from_webhook_list(""),
        }
    }
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Detection
        .route("/warnings/check", post(check))
        .route("/samples", post(ingest_samples))
        // Warnings
        .route("/warnings/active", get(list_active))
        .route("/warnings/historical", get(list_historical))
        .route("/warnings/stats", get(warning_stats))
        .route("/warnings/:event_id/acknowledge", post(acknowledge))
        // Thresholds
        .route(
            "/warnings/thresholds",
            get(list_thresholds).post(replace_thresholds),
        )
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = Arc::new(ThresholdRegistry::with_configs(config.thresholds)?);

    let store: Arc<dyn EventStore> = match &config.data_dir {
        Some(dir) => Arc::new(FileEventStore::open(dir)?),
        None => {
            tracing::warn!("No data directory configured, event history is kept in memory");
            Arc::new(MemoryEventStore::new())
        }
    };

    let state = Arc::new(AppState::new(
        registry,
        store,
        Notifier::new(config.notify),
        config.queue_capacity,
        config.drain_interval,
    ));

    // Start background journal
    let journal = Arc::clone(&state.journal);
    let journal_handle = Arc::clone(&journal).start();

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting Gridwatch server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Flush whatever the detector queued before the listener closed
    journal.stop();
    if let Err(e) = journal_handle.await {
        tracing::error!(error = %e, "Event journal task failed during shutdown");
    }

    tracing::info!("Gridwatch server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }

    tracing::info!("Shutdown signal received, draining event journal...");
}
