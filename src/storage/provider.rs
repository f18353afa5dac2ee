use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

use crate::error::{AppError, Result};

/// Object store used for originals and display variants
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Write an object, replacing any existing one
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<()>;

    /// Read a whole object. Missing objects are `NotFound`.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Delete an object. Deleting a missing object succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// URL a client can PUT the object to directly, sending `content_type`
    async fn presigned_upload_url(&self, key: &str, content_type: &str, expires: Duration) -> Result<String>;

    /// Time-limited URL for reading the object
    async fn presigned_download_url(&self, key: &str, expires: Duration) -> Result<String>;

    /// Get the storage type name
    fn storage_type(&self) -> &'static str;
}

/// Keys are relative, `/`-separated and free of `.`/`..` segments
pub fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && !key.contains('\\')
        && !key.chars().any(char::is_control)
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if valid {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!("Invalid object key: {}", key)))
    }
}
