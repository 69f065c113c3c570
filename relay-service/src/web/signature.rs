//! GoHighLevel webhook signature verification.
//!
//! GHL signs webhook requests with HMAC-SHA256 over the raw body. The
//! signature arrives in one of several header spellings depending on
//! the integration; GitHub-style headers carry a `sha256=` prefix.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Accepted signature header names, in priority order.
const SIGNATURE_HEADERS: [&str; 3] = [
    "x-ghl-signature",
    "x-gohighlevel-signature",
    "x-hub-signature-256",
];

/// Extract the hex signature from the request headers.
///
/// Tries each accepted header name in priority order and strips a
/// `sha256=` prefix if present. Returns `None` when no signature
/// header is present or the value is not valid ASCII.
pub fn extract_signature(headers: &HeaderMap) -> Option<String> {
    for name in SIGNATURE_HEADERS {
        if let Some(value) = headers.get(name) {
            let raw = value.to_str().ok()?.trim();
            let stripped = raw.strip_prefix("sha256=").unwrap_or(raw);
            return Some(stripped.to_string());
        }
    }
    None
}

/// Verify a GHL webhook signature against the raw request body.
///
/// Computes HMAC-SHA256(secret, raw_body) and compares the hex digest
/// against the provided signature in constant time.
///
/// Returns `true` only when the signature matches. Never panics or
/// errors; any malformed input is reported as a mismatch.
pub fn verify_ghl_signature(secret: &str, raw_body: &[u8], signature: &str) -> bool {
    if secret.is_empty() || signature.is_empty() {
        warn!(
            has_secret = !secret.is_empty(),
            has_signature = !signature.is_empty(),
            "ghl_signature_missing_fields"
        );
        return false;
    }

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            warn!("ghl_signature_invalid_key");
            return false;
        }
    };

    mac.update(raw_body);

    let expected_signature = hex::encode(mac.finalize().into_bytes());

    // Constant-time comparison to prevent timing attacks
    let valid = constant_time_compare(&expected_signature, signature);

    if !valid {
        warn!(
            expected_length = expected_signature.len(),
            actual_length = signature.len(),
            "ghl_signature_mismatch"
        );
    }

    valid
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
