use anyhow::{Context, Result};
use frostline::alarm::{validate_snapshot, AlarmStore, MemoryAlarmStore, SqliteAlarmStore};
use frostline::api::create_router;
use frostline::config::{self, config_path_from_env};
use frostline::session::TelemetrySession;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "frostline=info".into()),
        )
        .init();

    info!("Frostline starting...");

    let config = config::load(config_path_from_env().as_deref())?;
    validate_snapshot(&config.widgets).context("Invalid widget configuration")?;

    info!(
        broker_url = %config.broker.url,
        telemetry_topic = %config.broker.topics.telemetry,
        widgets = config.widgets.len(),
        api_bind = %config.api.bind,
        "Configuration loaded"
    );

    // Alarm store: SQLite when a database path is configured
    let store: Arc<dyn AlarmStore> = match &config.alarms.database {
        Some(path) => {
            let store = SqliteAlarmStore::open(path)?;
            info!(path = %path.display(), "Alarm store initialized");
            Arc::new(store)
        }
        None => {
            warn!("No alarm database configured, alarm records are kept in memory");
            Arc::new(MemoryAlarmStore::new())
        }
    };

    let session = TelemetrySession::create(&config, store)
        .await
        .context("Invalid broker URL")?;

    let router = create_router(Arc::clone(&session)).layer(CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind(&config.api.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.api.bind))?;
    info!(bind = %config.api.bind, "API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("API server error")?;

    // Graceful shutdown
    session.dispose().await;
    info!("Frostline stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for ctrl_c signal");
        return;
    }
    info!("Shutdown signal received");
}
