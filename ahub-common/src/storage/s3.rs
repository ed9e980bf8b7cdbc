use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::StatusCode;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{ObjectStore, PresignedRequest};
use crate::config::AppConfig;
use crate::sigv4::{self, Credentials};
use crate::{Error, Result};

const SERVICE: &str = "s3";

/// Lifetime of URLs the store presigns for its own requests
const INTERNAL_EXPIRY: Duration = Duration::from_secs(300);

/// S3 (or S3-compatible) bucket accessed through SigV4 presigned URLs
pub struct S3ObjectStore {
    bucket: String,
    region: String,
    /// Custom endpoint; selects path-style addressing
    endpoint: Option<Url>,
    credentials: Credentials,
    http: reqwest::Client,
}

impl S3ObjectStore {
    pub fn new(bucket: String, region: String, endpoint: Option<Url>, credentials: Credentials) -> Self {
        Self {
            bucket,
            region,
            endpoint,
            credentials,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let bucket = config
            .storage
            .bucket
            .clone()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| Error::Config("storage.bucket is required for S3".to_string()))?;
        let endpoint = config
            .storage
            .endpoint
            .as_deref()
            .map(|e| Url::parse(e).map_err(|err| Error::Config(format!("Invalid storage.endpoint '{}': {}", e, err))))
            .transpose()?;

        Ok(Self::new(
            bucket,
            config.storage_region().to_string(),
            endpoint,
            config.aws.credentials()?,
        ))
    }

    /// Virtual-hosted URL on AWS, path-style on a custom endpoint
    pub fn object_url(&self, key: &str) -> Result<Url> {
        let encoded_key = sigv4::uri_encode(key.trim_start_matches('/'), false);
        let raw = match &self.endpoint {
            Some(endpoint) => format!(
                "{}/{}/{}",
                endpoint.as_str().trim_end_matches('/'),
                self.bucket,
                encoded_key
            ),
            None => format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, encoded_key
            ),
        };
        Url::parse(&raw).map_err(|e| Error::Storage(format!("Invalid object URL '{}': {}", raw, e)))
    }

    fn presign(
        &self,
        method: &str,
        key: &str,
        headers: BTreeMap<String, String>,
        expires: Duration,
    ) -> Result<PresignedRequest> {
        let now = Utc::now();
        let header_refs: Vec<(&str, &str)> = headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let url = sigv4::presign_url(
            method,
            &self.object_url(key)?,
            &self.region,
            SERVICE,
            &self.credentials,
            expires,
            now,
            &header_refs,
        )?;
        let lifetime = chrono::Duration::from_std(expires)
            .map_err(|e| Error::InvalidInput(format!("Presign expiry out of range: {}", e)))?;

        Ok(PresignedRequest {
            url: url.to_string(),
            method: method.to_string(),
            headers,
            expires_at: now + lifetime,
        })
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    fn presign_put(&self, key: &str, content_type: &str, expires: Duration) -> Result<PresignedRequest> {
        let headers = BTreeMap::from([("content-type".to_string(), content_type.to_string())]);
        self.presign("PUT", key, headers, expires)
    }

    fn presign_get(&self, key: &str, expires: Duration) -> Result<PresignedRequest> {
        self.presign("GET", key, BTreeMap::new(), expires)
    }

    async fn get_object(&self, key: &str) -> Result<Bytes> {
        let request = self.presign_get(key, INTERNAL_EXPIRY)?;
        debug!(bucket = %self.bucket, key = %key, "Fetching object");

        let response = self
            .http
            .get(&request.url)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("GET {} failed: {}", key, e)))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(Error::NotFound(format!("Object not found: {}", key))),
            status if status.is_success() => response
                .bytes()
                .await
                .map_err(|e| Error::Storage(format!("Reading {} failed: {}", key, e))),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(Error::Storage(format!("GET {} returned {}: {}", key, status, body)))
            }
        }
    }

    async fn put_object(&self, key: &str, body: Bytes, content_type: &str) -> Result<()> {
        let request = self.presign_put(key, content_type, INTERNAL_EXPIRY)?;
        debug!(bucket = %self.bucket, key = %key, bytes = body.len(), "Uploading object");

        let response = self
            .http
            .put(&request.url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("PUT {} failed: {}", key, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Storage(format!("PUT {} returned {}: {}", key, status, body)));
        }
        Ok(())
    }
}
