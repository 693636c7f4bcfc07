//! S3-compatible object storage backend (AWS, MinIO, R2, ...).
//!
//! Requests are path-style (`{endpoint}/{bucket}/{key}`) and signed with
//! SigV4. Every request is bounded by the configured timeout.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Response, StatusCode};
use url::Url;

use super::sigv4::{self, Credentials};
use super::{Blob, BlobStore, DEFAULT_CONTENT_TYPE};
use crate::config::S3Config;
use crate::error::{AppError, ErrorKind};

/// Longest lifetime S3 accepts for a presigned URL.
const MAX_PRESIGN_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Clone)]
pub struct S3BlobStore {
    client: reqwest::Client,
    config: S3Config,
    /// Host header value, including a non-default port.
    host: String,
    /// Endpoint path prefix without trailing slash.
    base_path: String,
}

impl fmt::Debug for S3BlobStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3BlobStore")
            .field("endpoint", &self.config.endpoint.as_str())
            .field("bucket", &self.config.bucket)
            .field("region", &self.config.region)
            .finish()
    }
}

impl S3BlobStore {
    pub fn new(config: S3Config) -> Result<Self, AppError> {
        let host = host_header(&config.endpoint).ok_or_else(|| {
            AppError::configuration("S3_ENDPOINT_URL", "S3 endpoint has no host")
        })?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                AppError::wrap(ErrorKind::Configuration, "failed to build S3 HTTP client", e)
            })?;
        let base_path = config.endpoint.path().trim_end_matches('/').to_string();

        Ok(Self {
            client,
            config,
            host,
            base_path,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    fn credentials(&self) -> Credentials<'_> {
        Credentials {
            access_key_id: &self.config.access_key_id,
            secret_access_key: &self.config.secret_access_key,
            region: &self.config.region,
        }
    }

    fn object_path(&self, key: &str) -> Result<String, AppError> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(AppError::invalid_key(key, "key is empty"));
        }
        Ok(format!(
            "{}/{}/{}",
            self.base_path,
            urlencoding::encode(&self.config.bucket),
            sigv4::encode_path(key)
        ))
    }

    fn absolute(&self, path: &str) -> String {
        format!("{}://{}{}", self.config.endpoint.scheme(), self.host, path)
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        body: Option<(&[u8], &str)>,
    ) -> Result<Response, AppError> {
        let path = self.object_path(key)?;
        let payload_hash = sigv4::sha256_hex(body.map(|(bytes, _)| bytes).unwrap_or_default());
        let signed = sigv4::sign_request(
            &self.credentials(),
            method.as_str(),
            &self.host,
            &path,
            &payload_hash,
            Utc::now(),
        )?;

        let op = method.as_str().to_string();
        let mut request = self
            .client
            .request(method, self.absolute(&path))
            .header("x-amz-date", signed.amz_date)
            .header("x-amz-content-sha256", signed.content_sha256)
            .header(AUTHORIZATION, signed.authorization);
        if let Some((bytes, content_type)) = body {
            request = request.header(CONTENT_TYPE, content_type).body(bytes.to_vec());
        }

        request
            .send()
            .await
            .map_err(|e| transport_error(key, &op, e))
    }
}

fn host_header(endpoint: &Url) -> Option<String> {
    let host = endpoint.host_str()?;
    Some(match endpoint.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

fn transport_error(key: &str, op: &str, err: reqwest::Error) -> AppError {
    let kind = if err.is_timeout() {
        ErrorKind::StorageTimeout
    } else if err.is_connect() {
        ErrorKind::StorageConnection
    } else {
        ErrorKind::Storage
    };
    AppError::wrap(kind, format!("S3 {} request failed", op), err)
        .with_context("key", key)
        .with_context("backend", "s3")
}

fn status_error(key: &str, op: &str, status: StatusCode) -> AppError {
    if status == StatusCode::NOT_FOUND {
        return AppError::blob_not_found(key).with_context("backend", "s3");
    }
    let retryable = status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS;
    AppError::new(
        ErrorKind::Storage,
        format!("S3 {} returned {}", op, status.as_u16()),
    )
    .with_retryable(retryable)
    .with_context("key", key)
    .with_context("status", status.as_u16())
    .with_context("backend", "s3")
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn upload(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<String, AppError> {
        let response = self.send(Method::PUT, key, Some((bytes, content_type))).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(key, "PUT", status));
        }
        Ok(key.to_string())
    }

    async fn download(&self, key: &str) -> Result<Blob, AppError> {
        let response = self.send(Method::GET, key, None).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(key, "GET", status));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(key, "GET", e))?;

        Ok(Blob {
            bytes: bytes.to_vec(),
            content_type,
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, AppError> {
        let response = self.send(Method::HEAD, key, None).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(status_error(key, "HEAD", s)),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, AppError> {
        // DELETE succeeds for absent keys, so check first to report existence.
        if !self.exists(key).await? {
            return Ok(false);
        }
        let response = self.send(Method::DELETE, key, None).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(status_error(key, "DELETE", s)),
        }
    }

    async fn url(&self, key: &str, ttl: Duration) -> Result<Option<String>, AppError> {
        let path = self.object_path(key)?;
        let expires = ttl.as_secs().clamp(1, MAX_PRESIGN_SECS);
        let query = sigv4::presign_query(&self.credentials(), &self.host, &path, expires, Utc::now())?;
        Ok(Some(format!("{}?{}", self.absolute(&path), query)))
    }
}
