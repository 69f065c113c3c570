//! GHL Relay server binary.
//!
//! Receives GoHighLevel webhooks, verifies signatures, and archives
//! each event to S3. Configuration comes from the environment and is
//! read exactly once at startup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::{net::TcpListener, signal};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ghl_relay::storage::S3Client;
use ghl_relay::web::{router, AppState};
use ghl_relay::{ActivityLog, Archiver, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("relay_starting");

    // Load configuration
    let config = Config::from_env();
    info!(
        port = config.port,
        require_signature = config.require_signature,
        webhook_secret_configured = config.webhook_secret.is_some(),
        s3_bucket = %config.s3_bucket,
        s3_region = %config.s3_region,
        s3_endpoint = ?config.s3_endpoint,
        s3_key_prefix = %config.s3_key_prefix,
        activity_log_path = ?config.activity_log_path,
        "config_loaded"
    );

    if !config.s3_configured() {
        bail!("S3 storage is not configured (S3_BUCKET, S3_ACCESS_KEY, S3_SECRET_KEY)");
    }

    // Build the storage client and archiver
    let store = Arc::new(S3Client::new(&config).context("Failed to build S3 client")?);
    let archiver = Archiver::new(
        store,
        config.s3_key_prefix.clone(),
        config.s3_max_attempts,
        Duration::from_millis(config.s3_retry_base_ms),
    );

    // Open the activity log
    let activity = ActivityLog::open(config.activity_log_path.clone());
    info!(retained_entries = activity.len(), "activity_log_opened");

    // Create application state and router
    let port = config.port;
    let state = AppState::new(config, archiver, activity);
    let app = router(state).layer(TraceLayer::new_for_http());

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "relay_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("relay_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("relay_shutting_down");
}
