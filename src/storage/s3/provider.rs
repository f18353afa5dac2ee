use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::Method;
use std::time::Duration;

use crate::config::S3StorageConfig;
use crate::error::{AppError, Result};
use crate::storage::StorageProvider;

use super::client::Client;
use super::request::Response;

/// S3-compatible bucket (R2, MinIO, AWS)
pub struct S3Storage {
    client: Client,
}

impl S3Storage {
    pub fn new(config: &S3StorageConfig) -> Result<Self> {
        Ok(Self {
            client: Client::new(config)?,
        })
    }
}

fn storage_error(action: &str, key: &str, res: &Response) -> AppError {
    AppError::Storage(format!("S3 {} failed for {}: {}", action, key, res))
}

#[async_trait]
impl StorageProvider for S3Storage {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        let size = data.len();
        let res = self.client.put_object(key, data, content_type).await?;
        if !res.is_success() {
            return Err(storage_error("upload", key, &res));
        }
        tracing::debug!("Uploaded {} ({} bytes) to S3", key, size);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let res = self.client.get_object(key).await?;
        if res.is_not_found() {
            return Err(AppError::NotFound(format!("Object not found: {}", key)));
        }
        if !res.is_success() {
            return Err(storage_error("download", key, &res));
        }
        Ok(res.result)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let res = self.client.delete_object(key).await?;
        if !res.is_success() && !res.is_not_found() {
            return Err(storage_error("delete", key, &res));
        }
        tracing::debug!("Deleted {} from S3", key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let res = self.client.head_object(key).await?;
        if res.is_not_found() {
            return Ok(false);
        }
        if !res.is_success() {
            return Err(storage_error("head", key, &res));
        }
        Ok(true)
    }

    async fn presigned_upload_url(&self, key: &str, content_type: &str, expires: Duration) -> Result<String> {
        Ok(self
            .client
            .get_presigned_url(Method::PUT, key, Some(content_type), expires, Utc::now()))
    }

    async fn presigned_download_url(&self, key: &str, expires: Duration) -> Result<String> {
        Ok(self
            .client
            .get_presigned_url(Method::GET, key, None, expires, Utc::now()))
    }

    fn storage_type(&self) -> &'static str {
        "s3"
    }
}
