//! Object storage module.
//!
//! The relay only needs durable blob-put semantics plus a few
//! operational calls (connection test, delete, listing, signed URLs).
//! The `ObjectStore` trait is the seam between the webhook pipeline and
//! the concrete S3 wire client, which also lets tests substitute an
//! in-memory store.

pub mod s3;
pub mod sigv4;

use async_trait::async_trait;
use thiserror::Error;

pub use s3::S3Client;

/// Errors produced by the object storage client.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The HTTP request itself failed (connect, timeout, TLS).
    #[error("storage request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The storage service answered with a non-success status.
    #[error("storage rejected request: HTTP {status}: {detail}")]
    Rejected { status: u16, detail: String },

    /// The document could not be serialized for upload.
    #[error("failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Durable blob storage as seen by the webhook pipeline.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store a blob under the given key. A single atomic put; the blob
    /// is either fully written or not written at all.
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Check that the configured bucket is reachable and accessible.
    async fn head_bucket(&self) -> Result<(), StorageError>;

    /// Delete the blob under the given key.
    async fn delete_object(&self, key: &str) -> Result<(), StorageError>;

    /// List keys under the given prefix.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Produce a time-limited signed GET URL for the given key.
    fn presigned_get_url(&self, key: &str, expires_secs: u64) -> String;
}
