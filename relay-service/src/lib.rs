//! GHL Relay - webhook ingestion and archival service.
//!
//! Receives signed GoHighLevel webhook callbacks over HTTP, verifies
//! their HMAC signatures, normalizes the event payload, and archives
//! each event as an immutable JSON document in S3. A bounded activity
//! log gives operators visibility into recent deliveries.
//!
//! ## Pipeline
//!
//! ```text
//! POST /ghl/v1/webhook → content type → signature → JSON parse → S3 put
//! ```

pub mod activity;
pub mod archive;
pub mod config;
pub mod event;
pub mod storage;
pub mod web;

// Re-export commonly used types
pub use activity::{ActivityLog, LogEntry, LogLevel, LOG_CAPACITY};
pub use archive::{Archiver, WebhookEvent};
pub use config::Config;
pub use event::{extract_contact_id, extract_event_type};
pub use storage::{ObjectStore, S3Client, StorageError};
pub use web::AppState;
