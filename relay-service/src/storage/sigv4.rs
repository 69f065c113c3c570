//! AWS Signature Version 4 request signing primitives.
//!
//! Only what the S3 client needs: canonical request assembly, the
//! string-to-sign, the derived signing key, and S3-flavored URI
//! encoding. Reference: AWS General Reference, "Signature Version 4
//! signing process".

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Hex-encoded SHA-256 of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Timestamp in the `YYYYMMDDTHHMMSSZ` format SigV4 expects.
pub fn amz_date(at: &DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Date-only stamp used in the credential scope.
pub fn date_stamp(at: &DateTime<Utc>) -> String {
    at.format("%Y%m%d").to_string()
}

/// Credential scope string: `<date>/<region>/<service>/aws4_request`.
pub fn credential_scope(date: &str, region: &str, service: &str) -> String {
    format!("{}/{}/{}/aws4_request", date, region, service)
}

/// Derive the per-day signing key from the secret access key.
pub fn signing_key(secret_key: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// Build the canonical request and the matching signed-headers list.
///
/// Headers must arrive lowercase-keyed; the `BTreeMap` gives the sorted
/// order SigV4 requires.
pub fn canonical_request(
    method: &str,
    canonical_uri: &str,
    canonical_query: &str,
    headers: &BTreeMap<String, String>,
    payload_hash: &str,
) -> (String, String) {
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
        .collect();

    let signed_headers = headers
        .keys()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(";");

    let request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method, canonical_uri, canonical_query, canonical_headers, signed_headers, payload_hash
    );

    (request, signed_headers)
}

/// Build the string to sign from a canonical request.
pub fn string_to_sign(amz_date: &str, scope: &str, canonical_request: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        sha256_hex(canonical_request.as_bytes())
    )
}

/// Produce the final hex signature.
pub fn sign(string_to_sign: &str, signing_key: &[u8]) -> String {
    hex::encode(hmac_sha256(signing_key, string_to_sign.as_bytes()))
}

/// URI-encode a string per the SigV4 rules.
///
/// Unreserved characters pass through; everything else becomes
/// uppercase percent escapes. Path separators are preserved unless
/// `encode_slash` is set (query values encode the slash too).
pub fn uri_encode(input: &str, encode_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            b'/' if !encode_slash => out.push('/'),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_signing_key_reference_vector() {
        // Worked example from the AWS SigV4 documentation.
        let key = signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20150830",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "c4afb1cc5771d871763a393e44b703571b55cc28424d1a5e86da6ed3c154a4b9"
        );
    }

    #[test]
    fn test_amz_date_format() {
        let at = Utc.with_ymd_and_hms(2024, 3, 7, 9, 5, 59).unwrap();
        assert_eq!(amz_date(&at), "20240307T090559Z");
        assert_eq!(date_stamp(&at), "20240307");
    }

    #[test]
    fn test_credential_scope() {
        assert_eq!(
            credential_scope("20240307", "us-east-1", "s3"),
            "20240307/us-east-1/s3/aws4_request"
        );
    }

    #[test]
    fn test_canonical_request_layout() {
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), "bucket.s3.amazonaws.com".to_string());
        headers.insert("x-amz-date".to_string(), "20240307T090559Z".to_string());

        let (request, signed) =
            canonical_request("PUT", "/a/b.json", "", &headers, UNSIGNED_PAYLOAD);

        assert_eq!(signed, "host;x-amz-date");
        let lines: Vec<&str> = request.split('\n').collect();
        assert_eq!(lines[0], "PUT");
        assert_eq!(lines[1], "/a/b.json");
        assert_eq!(lines[2], "");
        assert_eq!(lines[3], "host:bucket.s3.amazonaws.com");
        assert_eq!(lines[4], "x-amz-date:20240307T090559Z");
        assert_eq!(lines[5], "");
        assert_eq!(lines[6], "host;x-amz-date");
        assert_eq!(lines[7], UNSIGNED_PAYLOAD);
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("a b/c", false), "a%20b/c");
        assert_eq!(uri_encode("a b/c", true), "a%20b%2Fc");
        assert_eq!(uri_encode("safe-._~chars", true), "safe-._~chars");
        assert_eq!(uri_encode("100%", true), "100%25");
    }
}
