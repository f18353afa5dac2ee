use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use std::time::Duration;
use url::Url;

use crate::config::S3StorageConfig;
use crate::error::{AppError, Result};

use super::request::{self, Response};
use super::signer::{self, Credentials, Signer};

/// Presigned URLs may not outlive a week
pub const MAX_PRESIGN_SECS: u64 = 7 * 24 * 3600;

/// Path-style client for one bucket on an S3-compatible endpoint
#[derive(Debug, Clone)]
pub struct Client {
    endpoint: Url,
    host: String,
    bucket: String,
    region: String,
    access_key_id: String,
    secret_access_key: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(config: &S3StorageConfig) -> Result<Self> {
        let endpoint = Url::parse(config.endpoint.trim_end_matches('/'))
            .map_err(|e| AppError::Internal(format!("Invalid S3 endpoint: {}", e)))?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => return Err(AppError::Internal("S3 endpoint has no host".to_string())),
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self {
            endpoint,
            host,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            access_key_id: config.access_key_id.clone(),
            secret_access_key: config.secret_access_key.clone(),
            http,
        })
    }

    pub fn get_host(&self) -> &str {
        &self.host
    }

    fn credentials(&self) -> Credentials<'_> {
        Credentials {
            access_key_id: &self.access_key_id,
            secret_access_key: &self.secret_access_key,
            region: &self.region,
        }
    }

    /// `/bucket/encoded/key`
    pub fn get_path_from_object_key(&self, key: &str) -> String {
        format!(
            "/{}/{}",
            self.bucket,
            signer::encode_path(key.trim_start_matches('/'))
        )
    }

    pub fn get_full_url_from_path(&self, path: &str) -> String {
        format!("{}://{}{}", self.endpoint.scheme(), self.host, path)
    }

    /// Headers for a request signed with the Authorization header
    fn get_headers_with_auth(
        &self,
        method: &Method,
        url_path: &str,
        payload: &[u8],
        content_type: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<HeaderMap> {
        let payload_hash = signer::sha256_hex(payload);
        let amz_date = signer::amz_date(at);

        let mut signer = Signer::new(method.as_str(), url_path)
            .header("host", &self.host)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);
        if let Some(content_type) = content_type {
            signer = signer.header("content-type", content_type);
        }
        let authorization = signer.authorization(&self.credentials(), at, &payload_hash);

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-amz-content-sha256"),
            header_value(&payload_hash)?,
        );
        headers.insert(HeaderName::from_static("x-amz-date"), header_value(&amz_date)?);
        if let Some(content_type) = content_type {
            headers.insert(CONTENT_TYPE, header_value(content_type)?);
        }
        headers.insert(AUTHORIZATION, header_value(&authorization)?);
        Ok(headers)
    }

    async fn do_req(
        &self,
        method: Method,
        key: &str,
        body: Option<Bytes>,
        content_type: Option<&str>,
    ) -> Result<Response> {
        let url_path = self.get_path_from_object_key(key);
        let payload = body.as_deref().unwrap_or_default();
        let headers = self.get_headers_with_auth(&method, &url_path, payload, content_type, Utc::now())?;
        let url = self.get_full_url_from_path(&url_path);
        Ok(request::send(&self.http, method, &url, headers, body).await)
    }

    pub async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> Result<Response> {
        self.do_req(Method::PUT, key, Some(data), Some(content_type)).await
    }

    pub async fn get_object(&self, key: &str) -> Result<Response> {
        self.do_req(Method::GET, key, None, None).await
    }

    pub async fn head_object(&self, key: &str) -> Result<Response> {
        self.do_req(Method::HEAD, key, None, None).await
    }

    pub async fn delete_object(&self, key: &str) -> Result<Response> {
        self.do_req(Method::DELETE, key, None, None).await
    }

    /// Presigned URL; when `content_type` is set the uploader must send exactly that header
    pub fn get_presigned_url(
        &self,
        method: Method,
        key: &str,
        content_type: Option<&str>,
        expires: Duration,
        at: DateTime<Utc>,
    ) -> String {
        let url_path = self.get_path_from_object_key(key);
        let mut signer = Signer::new(method.as_str(), &url_path).header("host", &self.host);
        if let Some(content_type) = content_type {
            signer = signer.header("content-type", content_type);
        }
        let expires = expires.as_secs().clamp(1, MAX_PRESIGN_SECS);
        let query = signer.presign(&self.credentials(), at, expires);
        format!("{}?{}", self.get_full_url_from_path(&url_path), query)
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| AppError::BadRequest(format!("Invalid header value: {}", value)))
}
