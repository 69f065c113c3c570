//! Archival of webhook events to object storage.
//!
//! Each accepted webhook becomes one immutable JSON document written
//! under a UTC date-partitioned key. The put happens only after every
//! validation step has passed, and is retried with bounded exponential
//! backoff before the failure is reported.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::storage::{ObjectStore, StorageError};

/// Origin details attached to every archived document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    pub source: String,
    pub endpoint_path: String,
    pub platform_version: String,
}

/// The archived webhook document. Written once, never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub received_at: DateTime<Utc>,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_id: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub payload: Value,
    pub metadata: EventMetadata,
}

impl WebhookEvent {
    pub fn new(
        event_type: String,
        contact_id: Option<String>,
        headers: BTreeMap<String, String>,
        payload: Value,
        endpoint_path: &str,
    ) -> Self {
        Self {
            received_at: Utc::now(),
            event_type,
            contact_id,
            headers,
            payload,
            metadata: EventMetadata {
                source: "gohighlevel".to_string(),
                endpoint_path: endpoint_path.to_string(),
                platform_version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

/// Build the storage key for an event:
/// `<prefix>/<YYYY>/<MM>/<DD>/<event_type>-<HHMMSS>-<rand8>.json`.
///
/// The random suffix keeps keys unique between same-second events of
/// the same type.
pub fn storage_key(prefix: &str, event_type: &str, at: &DateTime<Utc>) -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();

    format!(
        "{}/{}/{}-{}-{}.json",
        prefix,
        at.format("%Y/%m/%d"),
        key_slug(event_type),
        at.format("%H%M%S"),
        random
    )
}

/// Restrict an event type to characters safe in an object key.
fn key_slug(event_type: &str) -> String {
    event_type
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Writes event documents to object storage with bounded retry.
pub struct Archiver {
    store: Arc<dyn ObjectStore>,
    key_prefix: String,
    max_attempts: u32,
    retry_base: Duration,
}

impl Archiver {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        key_prefix: String,
        max_attempts: u32,
        retry_base: Duration,
    ) -> Self {
        Self {
            store,
            key_prefix,
            max_attempts: max_attempts.max(1),
            retry_base,
        }
    }

    /// Serialize the event and put it to storage, returning the key it
    /// was stored under.
    ///
    /// Transient put failures are retried up to the configured attempt
    /// count with doubling delay; the last error is returned once the
    /// attempts are exhausted.
    pub async fn archive(&self, event: &WebhookEvent) -> Result<String, StorageError> {
        let key = storage_key(&self.key_prefix, &event.event_type, &event.received_at);
        let body = serde_json::to_vec_pretty(event)?;

        let mut delay = self.retry_base;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .store
                .put_object(&key, body.clone(), "application/json")
                .await
            {
                Ok(()) => {
                    info!(
                        key = %key,
                        event_type = %event.event_type,
                        body_length = body.len(),
                        attempt = attempt,
                        "webhook_archived"
                    );
                    return Ok(key);
                }
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        key = %key,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "webhook_archive_retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    error!(
                        key = %key,
                        attempts = attempt,
                        error = %e,
                        "webhook_archive_failed"
                    );
                    return Err(e);
                }
            }
        }
    }
}
