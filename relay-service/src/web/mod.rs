//! Web server module for handling inbound webhooks.
//!
//! This module provides a thin web server that:
//! - Receives signed webhooks from GoHighLevel
//! - Verifies the HMAC signature
//! - Archives the event document to object storage
//! - Exposes the operator activity log

pub mod handlers;
pub mod signature;

use axum::routing::{get, post};
use axum::Router;

pub use handlers::{
    clear_logs, get_logs, ghl_webhook, health, AppState, HealthResponse, WebhookFailure,
    WebhookSuccess, WEBHOOK_PATH,
};
pub use signature::{extract_signature, verify_ghl_signature};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(WEBHOOK_PATH, post(handlers::ghl_webhook))
        .route(
            "/logs",
            get(handlers::get_logs).delete(handlers::clear_logs),
        )
        .with_state(state)
}
