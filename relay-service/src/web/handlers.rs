//! Webhook endpoint handlers.
//!
//! The webhook handler is a straight-line pipeline with early exit:
//! content type → signature → JSON parse → archive → respond. Exactly
//! one response per request, and every failure is recorded in the
//! activity log before the response goes out.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::activity::{ActivityLog, LogEntry, LOG_CAPACITY};
use crate::archive::{Archiver, WebhookEvent};
use crate::config::Config;
use crate::event::{extract_contact_id, extract_event_type};
use crate::web::signature::{extract_signature, verify_ghl_signature};

/// Path the webhook endpoint is mounted on, recorded in every
/// archived document's metadata.
pub const WEBHOOK_PATH: &str = "/ghl/v1/webhook";

/// Default number of activity log entries returned by `GET /logs`.
const DEFAULT_LOGS_LIMIT: usize = 50;

/// Headers copied into the archived document. Everything else is
/// dropped, signature headers included.
const SAFE_HEADERS: [&str; 6] = [
    "content-type",
    "content-length",
    "user-agent",
    "x-forwarded-for",
    "x-real-ip",
    "accept",
];

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub archiver: Arc<Archiver>,
    pub activity: ActivityLog,
}

impl AppState {
    pub fn new(config: Config, archiver: Archiver, activity: ActivityLog) -> Self {
        Self {
            config: Arc::new(config),
            archiver: Arc::new(archiver),
            activity,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// GHL Webhook
// =============================================================================

/// Success response for an archived webhook.
#[derive(Serialize)]
pub struct WebhookSuccess {
    pub success: bool,
    pub message: &'static str,
    pub processing_time_ms: f64,
    pub storage_key: String,
    pub timestamp: String,
}

/// Error response shared by all failure statuses.
#[derive(Serialize)]
pub struct WebhookFailure {
    pub success: bool,
    pub error: String,
    pub timestamp: String,
}

/// GHL webhook endpoint.
///
/// This endpoint:
/// 1. Validates the content type
/// 2. Verifies the HMAC signature (when enforcement is enabled)
/// 3. Parses the JSON payload
/// 4. Archives the enriched event document to object storage
pub async fn ghl_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());

    info!(
        content_type = ?content_type,
        body_size = body.len(),
        "ghl_webhook_received"
    );
    state.activity.info(
        "Webhook received",
        json!({
            "method": "POST",
            "content_type": content_type,
            "body_size": body.len(),
        }),
    );

    if !is_valid_content_type(content_type) {
        warn!(content_type = ?content_type, "ghl_webhook_bad_content_type");
        state.activity.error(
            "Invalid content type",
            json!({"content_type": content_type}),
        );
        return error_response(
            StatusCode::BAD_REQUEST,
            "Invalid content type. Expected application/json",
        );
    }

    if state.config.require_signature {
        let verified = match (&state.config.webhook_secret, extract_signature(&headers)) {
            (Some(secret), Some(signature)) => verify_ghl_signature(secret, &body, &signature),
            (None, _) => {
                // Enforcement with no secret configured fails closed.
                warn!("ghl_webhook_secret_missing");
                false
            }
            (Some(_), None) => {
                warn!("ghl_webhook_signature_header_missing");
                false
            }
        };

        if !verified {
            // Generic message on purpose: the response does not reveal
            // which part of the check failed.
            state
                .activity
                .error("Signature verification failed", Value::Null);
            return error_response(StatusCode::UNAUTHORIZED, "Signature verification failed");
        }
    } else {
        info!("ghl_webhook_signature_check_skipped");
        state
            .activity
            .info("Signature verification disabled - skipping", Value::Null);
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "ghl_webhook_invalid_json");
            state
                .activity
                .error("Invalid JSON payload", json!({"detail": e.to_string()}));
            return error_response(StatusCode::BAD_REQUEST, format!("Invalid JSON: {}", e));
        }
    };

    let event_type = extract_event_type(&payload);
    let contact_id = extract_contact_id(&payload);
    let event = WebhookEvent::new(
        event_type.clone(),
        contact_id,
        sanitize_headers(&headers),
        payload,
        WEBHOOK_PATH,
    );

    match state.archiver.archive(&event).await {
        Ok(storage_key) => {
            let processing_time_ms = elapsed_ms(start);
            info!(
                event_type = %event_type,
                storage_key = %storage_key,
                processing_time_ms = processing_time_ms,
                "ghl_webhook_processed"
            );
            state.activity.info(
                "Webhook processed successfully",
                json!({
                    "event_type": event_type,
                    "storage_key": storage_key,
                    "processing_time_ms": processing_time_ms,
                }),
            );

            (
                StatusCode::OK,
                Json(WebhookSuccess {
                    success: true,
                    message: "Webhook processed successfully",
                    processing_time_ms,
                    storage_key,
                    timestamp: Utc::now().to_rfc3339(),
                }),
            )
                .into_response()
        }
        Err(e) => {
            // Full detail stays internal; the caller gets a generic message.
            error!(event_type = %event_type, error = %e, "ghl_webhook_archive_error");
            state.activity.error(
                "Failed to archive webhook",
                json!({"event_type": event_type, "detail": e.to_string()}),
            );
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to process webhook",
            )
        }
    }
}

// =============================================================================
// Activity Log
// =============================================================================

#[derive(Deserialize)]
pub struct LogsQuery {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct LogsResponse {
    pub count: usize,
    pub entries: Vec<LogEntry>,
}

/// Read recent activity log entries, most recent first.
pub async fn get_logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Json<LogsResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_LOGS_LIMIT).min(LOG_CAPACITY);
    let entries = state.activity.recent(limit);
    Json(LogsResponse {
        count: entries.len(),
        entries,
    })
}

#[derive(Serialize)]
pub struct ClearLogsResponse {
    pub cleared: usize,
}

/// Clear the activity log in bulk.
pub async fn clear_logs(State(state): State<AppState>) -> Json<ClearLogsResponse> {
    let cleared = state.activity.clear();
    info!(cleared = cleared, "activity_log_cleared");
    Json(ClearLogsResponse { cleared })
}

// =============================================================================
// Helpers
// =============================================================================

/// Accept `application/json` and `text/json`, with or without
/// parameters such as `charset=utf-8`.
fn is_valid_content_type(value: Option<&str>) -> bool {
    let Some(raw) = value else { return false };
    let mime = raw
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "application/json" || mime == "text/json"
}

/// Copy the allow-listed subset of request headers for archival.
fn sanitize_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for name in SAFE_HEADERS {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            out.insert(name.to_string(), value.to_string());
        }
    }
    out
}

/// Elapsed time in milliseconds, rounded to two decimals.
fn elapsed_ms(start: Instant) -> f64 {
    (start.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(WebhookFailure {
            success: false,
            error: message.into(),
            timestamp: Utc::now().to_rfc3339(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ObjectStore, StorageError};
    use crate::web::router;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use hmac::{Hmac, Mac};
    use http_body_util::BodyExt;
    use sha2::Sha256;
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;

    /// In-memory object store recording puts, optionally failing all
    /// of them.
    struct MemoryStore {
        puts: Mutex<Vec<(String, Vec<u8>)>>,
        fail: bool,
    }

    impl MemoryStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                puts: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                puts: Mutex::new(Vec::new()),
                fail: true,
            })
        }

        fn put_count(&self) -> usize {
            self.puts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn put_object(
            &self,
            key: &str,
            body: Vec<u8>,
            _content_type: &str,
        ) -> Result<(), StorageError> {
            if self.fail {
                return Err(StorageError::Rejected {
                    status: 500,
                    detail: "InternalError".to_string(),
                });
            }
            self.puts.lock().unwrap().push((key.to_string(), body));
            Ok(())
        }

        async fn head_bucket(&self) -> Result<(), StorageError> {
            Ok(())
        }

        async fn delete_object(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }

        async fn list_objects(&self, _prefix: &str) -> Result<Vec<String>, StorageError> {
            Ok(Vec::new())
        }

        fn presigned_get_url(&self, key: &str, _expires_secs: u64) -> String {
            format!("memory://{}", key)
        }
    }

    fn test_state(
        store: Arc<MemoryStore>,
        secret: Option<&str>,
        require_signature: bool,
    ) -> AppState {
        let config = Config {
            port: 0,
            webhook_secret: secret.map(String::from),
            require_signature,
            s3_bucket: "test-bucket".to_string(),
            s3_region: "us-east-1".to_string(),
            s3_access_key: "key".to_string(),
            s3_secret_key: "secret".to_string(),
            s3_endpoint: None,
            s3_key_prefix: "ghl-webhooks".to_string(),
            s3_max_attempts: 1,
            s3_retry_base_ms: 1,
            request_timeout_ms: 1000,
            activity_log_path: None,
        };
        let archiver = Archiver::new(
            store,
            "ghl-webhooks".to_string(),
            1,
            Duration::from_millis(1),
        );
        AppState::new(config, archiver, ActivityLog::open(None))
    }

    fn sign(secret: &str, body: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn webhook_request(
        body: &str,
        content_type: Option<&str>,
        signature: Option<&str>,
    ) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(WEBHOOK_PATH);
        if let Some(ct) = content_type {
            builder = builder.header("content-type", ct);
        }
        if let Some(sig) = signature {
            builder = builder.header("x-ghl-signature", sig);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn response_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_valid_signature_archives_event() {
        let store = MemoryStore::new();
        let state = test_state(store.clone(), Some("s3cr3t"), true);

        let body = r#"{"event":"contact_created","contact":{"email":"a@b.com"}}"#;
        let signature = format!("sha256={}", sign("s3cr3t", body));
        let request = webhook_request(body, Some("application/json"), Some(&signature));

        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = response_json(response).await;
        assert_eq!(json["success"], Value::Bool(true));
        let key = json["storage_key"].as_str().unwrap();
        assert!(key.starts_with("ghl-webhooks/"));
        assert!(key.ends_with(".json"));
        assert!(key.contains("contact_created-"));

        let puts = store.puts.lock().unwrap();
        assert_eq!(puts.len(), 1);
        let stored: Value = serde_json::from_slice(&puts[0].1).unwrap();
        assert_eq!(stored["event_type"], "contact_created");
        assert_eq!(stored["metadata"]["source"], "gohighlevel");
    }

    #[tokio::test]
    async fn test_wrong_signature_rejected() {
        let store = MemoryStore::new();
        let state = test_state(store.clone(), Some("s3cr3t"), true);

        let body = r#"{"event":"contact_created"}"#;
        let wrong = sign("other-secret", body);
        let request = webhook_request(body, Some("application/json"), Some(&wrong));

        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let json = response_json(response).await;
        assert_eq!(json["success"], Value::Bool(false));
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_signature_rejected() {
        let store = MemoryStore::new();
        let state = test_state(store.clone(), Some("s3cr3t"), true);

        let request = webhook_request(r#"{"event":"x"}"#, Some("application/json"), None);
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_enforcement_without_secret_fails_closed() {
        let store = MemoryStore::new();
        let state = test_state(store.clone(), None, true);

        let body = r#"{"event":"x"}"#;
        let signature = sign("anything", body);
        let request = webhook_request(body, Some("application/json"), Some(&signature));

        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_verification_disabled_accepts_unsigned() {
        let store = MemoryStore::new();
        let state = test_state(store.clone(), None, false);

        let request = webhook_request(
            r#"{"type":"OpportunityCreate"}"#,
            Some("application/json; charset=utf-8"),
            None,
        );
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_bad_content_type_rejected() {
        let store = MemoryStore::new();
        let state = test_state(store.clone(), None, false);

        let request = webhook_request(r#"{"event":"x"}"#, Some("text/plain"), None);
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_content_type_rejected() {
        let store = MemoryStore::new();
        let state = test_state(store.clone(), None, false);

        let request = webhook_request(r#"{"event":"x"}"#, None, None);
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_json_rejected() {
        let store = MemoryStore::new();
        let state = test_state(store.clone(), None, false);

        let request = webhook_request(r#"{"event": "x",}"#, Some("application/json"), None);
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let json = response_json(response).await;
        assert!(json["error"].as_str().unwrap().starts_with("Invalid JSON"));
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_storage_failure_is_internal_error() {
        let store = MemoryStore::failing();
        let state = test_state(store.clone(), None, false);

        let request = webhook_request(r#"{"event":"x"}"#, Some("application/json"), None);
        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let json = response_json(response).await;
        // Generic message only; no storage detail leaks to the caller.
        assert_eq!(json["error"], "Failed to process webhook");
    }

    #[tokio::test]
    async fn test_logs_endpoint_reads_and_clears() {
        let store = MemoryStore::new();
        let state = test_state(store, None, false);
        let app = router(state.clone());

        let request = webhook_request(r#"{"event":"x"}"#, Some("application/json"), None);
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/logs?limit=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = response_json(response).await;
        assert_eq!(json["count"], Value::from(2));
        // Newest first: the success entry precedes the receipt entry.
        assert_eq!(
            json["entries"][0]["message"],
            "Webhook processed successfully"
        );

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/logs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.activity.is_empty());
    }

    #[tokio::test]
    async fn test_health() {
        let store = MemoryStore::new();
        let state = test_state(store, None, false);

        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_is_valid_content_type() {
        assert!(is_valid_content_type(Some("application/json")));
        assert!(is_valid_content_type(Some("application/json; charset=utf-8")));
        assert!(is_valid_content_type(Some("Application/JSON")));
        assert!(is_valid_content_type(Some("text/json")));
        assert!(!is_valid_content_type(Some("text/plain")));
        assert!(!is_valid_content_type(Some("application/x-www-form-urlencoded")));
        assert!(!is_valid_content_type(None));
    }

    #[test]
    fn test_sanitize_headers_allowlist() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("user-agent", "ghl/1.0".parse().unwrap());
        headers.insert("x-ghl-signature", "sha256=abc".parse().unwrap());
        headers.insert("cookie", "session=1".parse().unwrap());

        let sanitized = sanitize_headers(&headers);
        assert_eq!(sanitized.len(), 2);
        assert_eq!(sanitized["content-type"], "application/json");
        assert_eq!(sanitized["user-agent"], "ghl/1.0");
        assert!(!sanitized.contains_key("x-ghl-signature"));
    }
}
