//! S3 wire client built on reqwest with SigV4 request signing.
//!
//! Uses virtual-hosted-style addressing against AWS by default. An
//! endpoint override switches to path-style addressing for local S3
//! stand-ins in development and tests.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use url::Url;

use super::sigv4;
use super::{ObjectStore, StorageError};
use crate::config::Config;

const SERVICE: &str = "s3";

/// Maximum bytes of a storage error body carried into the error detail.
const DETAIL_LIMIT: usize = 512;

/// S3 client holding credentials and addressing configuration.
pub struct S3Client {
    http: reqwest::Client,
    bucket: String,
    region: String,
    access_key: String,
    secret_key: String,
    endpoint: Option<Url>,
}

impl S3Client {
    /// Build a client from configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let endpoint = config
            .s3_endpoint
            .as_deref()
            .map(Url::parse)
            .transpose()
            .context("Invalid S3 endpoint URL")?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            bucket: config.s3_bucket.clone(),
            region: config.s3_region.clone(),
            access_key: config.s3_access_key.clone(),
            secret_key: config.s3_secret_key.clone(),
            endpoint,
        })
    }

    /// Host for the Host header and request URL.
    fn host(&self) -> String {
        match &self.endpoint {
            Some(url) => {
                let host = url.host_str().unwrap_or_default();
                match url.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                }
            }
            None => format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
        }
    }

    fn base_url(&self) -> String {
        match &self.endpoint {
            Some(url) => format!("{}://{}", url.scheme(), self.host()),
            None => format!("https://{}", self.host()),
        }
    }

    /// Canonical URI for an object key.
    fn object_uri(&self, key: &str) -> String {
        let encoded = sigv4::uri_encode(key, false);
        match &self.endpoint {
            Some(_) => format!("/{}/{}", self.bucket, encoded),
            None => format!("/{}", encoded),
        }
    }

    /// Canonical URI for bucket-level operations.
    fn bucket_uri(&self) -> String {
        match &self.endpoint {
            Some(_) => format!("/{}", self.bucket),
            None => "/".to_string(),
        }
    }

    /// Sign a request and return the headers to attach.
    ///
    /// The Host header participates in the signature but is set by
    /// reqwest from the URL, so it is excluded from the returned list.
    fn signed_headers(
        &self,
        method: &str,
        canonical_uri: &str,
        canonical_query: &str,
        extra: &[(&str, String)],
        payload_hash: &str,
        at: &DateTime<Utc>,
    ) -> Vec<(String, String)> {
        let amz_date = sigv4::amz_date(at);
        let date = sigv4::date_stamp(at);

        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), self.host());
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.to_string());
        headers.insert("x-amz-date".to_string(), amz_date.clone());
        for (name, value) in extra {
            headers.insert(name.to_string(), value.clone());
        }

        let (canonical, signed) =
            sigv4::canonical_request(method, canonical_uri, canonical_query, &headers, payload_hash);
        let scope = sigv4::credential_scope(&date, &self.region, SERVICE);
        let string_to_sign = sigv4::string_to_sign(&amz_date, &scope, &canonical);
        let signing_key = sigv4::signing_key(&self.secret_key, &date, &self.region, SERVICE);
        let signature = sigv4::sign(&string_to_sign, &signing_key);

        let authorization = format!(
            "{} Credential={}/{}, SignedHeaders={}, Signature={}",
            sigv4::ALGORITHM,
            self.access_key,
            scope,
            signed,
            signature
        );

        let mut out: Vec<(String, String)> = headers
            .into_iter()
            .filter(|(name, _)| name != "host")
            .collect();
        out.push(("authorization".to_string(), authorization));
        out
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let mut detail = response.text().await.unwrap_or_default();
        if detail.len() > DETAIL_LIMIT {
            let mut end = DETAIL_LIMIT;
            while !detail.is_char_boundary(end) {
                end -= 1;
            }
            detail.truncate(end);
        }
        Err(StorageError::Rejected {
            status: status.as_u16(),
            detail,
        })
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let now = Utc::now();
        let payload_hash = sigv4::sha256_hex(&body);
        let uri = self.object_uri(key);
        let extra = [
            ("content-type", content_type.to_string()),
            ("x-amz-acl", "private".to_string()),
            ("x-amz-meta-source", "ghl-relay".to_string()),
            ("x-amz-meta-uploaded-at", now.to_rfc3339()),
        ];
        let headers = self.signed_headers("PUT", &uri, "", &extra, &payload_hash, &now);

        let body_length = body.len();
        let mut request = self
            .http
            .put(format!("{}{}", self.base_url(), uri))
            .body(body);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        Self::ensure_success(response).await?;

        info!(key = key, body_length = body_length, "s3_put_complete");
        Ok(())
    }

    async fn head_bucket(&self) -> Result<(), StorageError> {
        let now = Utc::now();
        let payload_hash = sigv4::sha256_hex(b"");
        let uri = self.bucket_uri();
        let headers = self.signed_headers("HEAD", &uri, "", &[], &payload_hash, &now);

        let mut request = self.http.head(format!("{}{}", self.base_url(), uri));
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        Self::ensure_success(response).await?;

        info!(bucket = %self.bucket, "s3_head_bucket_ok");
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        let now = Utc::now();
        let payload_hash = sigv4::sha256_hex(b"");
        let uri = self.object_uri(key);
        let headers = self.signed_headers("DELETE", &uri, "", &[], &payload_hash, &now);

        let mut request = self.http.delete(format!("{}{}", self.base_url(), uri));
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        Self::ensure_success(response).await?;

        info!(key = key, "s3_delete_complete");
        Ok(())
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let now = Utc::now();
        let payload_hash = sigv4::sha256_hex(b"");
        let uri = self.bucket_uri();
        // Query parameters sorted by name, as the canonical form requires.
        let query = format!("list-type=2&prefix={}", sigv4::uri_encode(prefix, true));
        let headers = self.signed_headers("GET", &uri, &query, &[], &payload_hash, &now);

        let mut request = self
            .http
            .get(format!("{}{}?{}", self.base_url(), uri, query));
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let response = Self::ensure_success(response).await?;
        let xml = response.text().await?;
        let keys = parse_list_keys(&xml);

        info!(prefix = prefix, count = keys.len(), "s3_list_complete");
        Ok(keys)
    }

    fn presigned_get_url(&self, key: &str, expires_secs: u64) -> String {
        let now = Utc::now();
        let amz_date = sigv4::amz_date(&now);
        let date = sigv4::date_stamp(&now);
        let scope = sigv4::credential_scope(&date, &self.region, SERVICE);
        let credential = sigv4::uri_encode(&format!("{}/{}", self.access_key, scope), true);
        let uri = self.object_uri(key);

        // Already in canonical (sorted) parameter order.
        let query = format!(
            "X-Amz-Algorithm={}&X-Amz-Credential={}&X-Amz-Date={}&X-Amz-Expires={}&X-Amz-SignedHeaders=host",
            sigv4::ALGORITHM,
            credential,
            amz_date,
            expires_secs
        );

        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), self.host());
        let (canonical, _) =
            sigv4::canonical_request("GET", &uri, &query, &headers, sigv4::UNSIGNED_PAYLOAD);
        let string_to_sign = sigv4::string_to_sign(&amz_date, &scope, &canonical);
        let signing_key = sigv4::signing_key(&self.secret_key, &date, &self.region, SERVICE);
        let signature = sigv4::sign(&string_to_sign, &signing_key);

        format!(
            "{}{}?{}&X-Amz-Signature={}",
            self.base_url(),
            uri,
            query,
            signature
        )
    }
}

/// Pull `<Key>` values out of a ListObjectsV2 response.
///
/// The listing response is shallow and regular, so a scan for the key
/// tags avoids carrying an XML parser dependency.
fn parse_list_keys(xml: &str) -> Vec<String> {
    let mut keys = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<Key>") {
        let after = &rest[start + "<Key>".len()..];
        match after.find("</Key>") {
            Some(end) => {
                keys.push(xml_unescape(&after[..end]));
                rest = &after[end + "</Key>".len()..];
            }
            None => break,
        }
    }
    keys
}

fn xml_unescape(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
