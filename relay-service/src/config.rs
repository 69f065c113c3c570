//! Configuration module for environment variable parsing.
//!
//! All settings are read once at startup into an immutable struct and
//! passed to the components that need them. Nothing re-reads the
//! environment mid-request.

use std::env;
use std::path::PathBuf;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// Shared secret for webhook HMAC verification
    pub webhook_secret: Option<String>,

    /// Whether signature verification is enforced.
    ///
    /// When true and no secret is configured, every request is rejected
    /// (fail closed). When false, verification is skipped and the skip
    /// is logged.
    pub require_signature: bool,

    // =========================================================================
    // Object storage
    // =========================================================================

    /// S3 bucket receiving archived webhook documents
    pub s3_bucket: String,

    /// AWS region of the bucket
    pub s3_region: String,

    /// AWS access key ID
    pub s3_access_key: String,

    /// AWS secret access key
    pub s3_secret_key: String,

    /// Optional endpoint override (path-style addressing), for local
    /// S3 stand-ins in development and tests
    pub s3_endpoint: Option<String>,

    /// Key prefix for archived webhook documents
    pub s3_key_prefix: String,

    /// Maximum put attempts before the archival write is reported failed
    pub s3_max_attempts: u32,

    /// Base delay in milliseconds for the put retry backoff (doubles
    /// per attempt)
    pub s3_retry_base_ms: u64,

    /// HTTP request timeout in milliseconds for storage calls
    pub request_timeout_ms: u64,

    // =========================================================================
    // Activity log
    // =========================================================================

    /// Optional path where the activity log is persisted as JSON.
    /// When unset the log is kept in memory only.
    pub activity_log_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),

            webhook_secret: env::var("GHL_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.trim().is_empty()),

            require_signature: env::var("GHL_REQUIRE_SIGNATURE")
                .ok()
                .and_then(|v| parse_bool(&v))
                .unwrap_or(false),

            s3_bucket: env::var("S3_BUCKET").unwrap_or_default(),

            s3_region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),

            s3_access_key: env::var("S3_ACCESS_KEY").unwrap_or_default(),

            s3_secret_key: env::var("S3_SECRET_KEY").unwrap_or_default(),

            s3_endpoint: env::var("S3_ENDPOINT").ok().filter(|s| !s.is_empty()),

            s3_key_prefix: env::var("S3_KEY_PREFIX")
                .unwrap_or_else(|_| "ghl-webhooks".to_string()),

            s3_max_attempts: env::var("S3_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n| n >= 1)
                .unwrap_or(3),

            s3_retry_base_ms: env::var("S3_RETRY_BASE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(200),

            request_timeout_ms: env::var("REQUEST_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),

            activity_log_path: env::var("ACTIVITY_LOG_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        }
    }

    /// Whether the S3 client has enough configuration to operate.
    pub fn s3_configured(&self) -> bool {
        !self.s3_bucket.is_empty()
            && !self.s3_access_key.is_empty()
            && !self.s3_secret_key.is_empty()
    }
}

/// Parse common truthy/falsy spellings.
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("true"), Some(true));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_s3_configured() {
        let mut config = Config {
            port: 8080,
            webhook_secret: None,
            require_signature: false,
            s3_bucket: "bucket".to_string(),
            s3_region: "us-east-1".to_string(),
            s3_access_key: "key".to_string(),
            s3_secret_key: "secret".to_string(),
            s3_endpoint: None,
            s3_key_prefix: "ghl-webhooks".to_string(),
            s3_max_attempts: 3,
            s3_retry_base_ms: 200,
            request_timeout_ms: 8000,
            activity_log_path: None,
        };
        assert!(config.s3_configured());

        config.s3_bucket.clear();
        assert!(!config.s3_configured());
    }
}
