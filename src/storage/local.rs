use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::config::LocalStorageConfig;
use crate::error::{AppError, Result};
use crate::storage::s3::signer::encode_path;
use crate::storage::{validate_key, StorageProvider};

type HmacSha256 = Hmac<Sha256>;

/// Filesystem-backed store. Presigned URLs point at this server's blob
/// routes and carry an HMAC over method, key, expiry and content type.
pub struct LocalStorage {
    base_path: PathBuf,
    public_url: String,
    signing_secret: String,
}

impl LocalStorage {
    pub fn new(config: &LocalStorageConfig, public_url: &str) -> Self {
        Self {
            base_path: PathBuf::from(&config.base_path),
            public_url: public_url.trim_end_matches('/').to_string(),
            signing_secret: config.signing_secret.clone(),
        }
    }

    fn get_full_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }

    fn mac(&self, method: &str, key: &str, expires_at: i64, content_type: Option<&str>) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(self.signing_secret.as_bytes())
            .expect("HMAC can take key of any size");
        let message = format!(
            "{}\n{}\n{}\n{}",
            method.to_uppercase(),
            key,
            expires_at,
            content_type.unwrap_or("")
        );
        mac.update(message.as_bytes());
        mac
    }

    pub fn sign(&self, method: &str, key: &str, expires_at: i64, content_type: Option<&str>) -> String {
        hex::encode(self.mac(method, key, expires_at, content_type).finalize().into_bytes())
    }

    pub fn signed_url(
        &self,
        method: &str,
        key: &str,
        content_type: Option<&str>,
        expires: Duration,
        now: i64,
    ) -> String {
        let expires_at = now + expires.as_secs().max(1) as i64;
        format!(
            "{}/api/v1/blob/{}?expires={}&signature={}",
            self.public_url,
            encode_path(key),
            expires_at,
            self.sign(method, key, expires_at, content_type)
        )
    }

    /// Check a blob request against its signature and expiry
    pub fn verify(
        &self,
        method: &str,
        key: &str,
        expires_at: i64,
        signature: &str,
        content_type: Option<&str>,
        now: i64,
    ) -> Result<()> {
        if now > expires_at {
            return Err(AppError::Forbidden("URL expired".to_string()));
        }
        let signature =
            hex::decode(signature).map_err(|_| AppError::Forbidden("Invalid signature".to_string()))?;
        self.mac(method, key, expires_at, content_type)
            .verify_slice(&signature)
            .map_err(|_| AppError::Forbidden("Invalid signature".to_string()))
    }

    /// Stream a request body into `key`, refusing bodies over `max_bytes`.
    /// Data lands in a temporary file first so readers never see a partial object.
    pub async fn put_stream<S, E>(&self, key: &str, mut stream: S, max_bytes: u64) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin + Send,
        E: Display,
    {
        let full_path = self.get_full_path(key)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp_path = full_path.with_extension(format!("part-{}", Uuid::new_v4()));

        let written = match self.write_chunks(&temp_path, &mut stream, max_bytes).await {
            Ok(written) => written,
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e);
            }
        };

        fs::rename(&temp_path, &full_path).await?;
        tracing::debug!("Stored {} ({} bytes) at {:?}", key, written, full_path);
        Ok(written)
    }

    async fn write_chunks<S, E>(&self, path: &Path, stream: &mut S, max_bytes: u64) -> Result<u64>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin + Send,
        E: Display,
    {
        let mut file = fs::File::create(path).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Failed to read body: {}", e)))?;
            written += chunk.len() as u64;
            if written > max_bytes {
                return Err(AppError::BadRequest(format!(
                    "File too large: limit is {} bytes",
                    max_bytes
                )));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(written)
    }

    /// Open an object for streaming, returning the file and its length
    pub async fn open(&self, key: &str) -> Result<(fs::File, u64)> {
        let full_path = self.get_full_path(key)?;
        let file = fs::File::open(&full_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::NotFound(format!("Object not found: {}", key))
            } else {
                AppError::Storage(format!("Failed to open {}: {}", key, e))
            }
        })?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }
}

#[async_trait]
impl StorageProvider for LocalStorage {
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> Result<()> {
        let size = data.len() as u64;
        let stream = futures::stream::iter([Ok::<_, std::io::Error>(data)]);
        self.put_stream(key, stream, size).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let full_path = self.get_full_path(key)?;

        let data = fs::read(&full_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::NotFound(format!("Object not found: {}", key))
            } else {
                AppError::Storage(format!("Failed to read {}: {}", key, e))
            }
        })?;

        Ok(Bytes::from(data))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.get_full_path(key)?;

        match fs::remove_file(&full_path).await {
            Ok(()) => tracing::debug!("Deleted {:?}", full_path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        // Prune empty parent directories up to the base path
        let mut current_dir = full_path.parent().map(|p| p.to_path_buf());
        while let Some(dir) = current_dir {
            if dir == self.base_path {
                break;
            }
            match fs::read_dir(&dir).await {
                Ok(mut entries) => {
                    if entries.next_entry().await?.is_some() {
                        break;
                    }
                    let _ = fs::remove_dir(&dir).await;
                }
                Err(_) => break,
            }
            current_dir = dir.parent().map(|p| p.to_path_buf());
        }

        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let full_path = self.get_full_path(key)?;
        Ok(fs::try_exists(&full_path).await?)
    }

    async fn presigned_upload_url(&self, key: &str, content_type: &str, expires: Duration) -> Result<String> {
        validate_key(key)?;
        Ok(self.signed_url("PUT", key, Some(content_type), expires, Utc::now().timestamp()))
    }

    async fn presigned_download_url(&self, key: &str, expires: Duration) -> Result<String> {
        validate_key(key)?;
        Ok(self.signed_url("GET", key, None, expires, Utc::now().timestamp()))
    }

    fn storage_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(dir: &tempfile::TempDir) -> LocalStorage {
        LocalStorage::new(
            &LocalStorageConfig {
                base_path: dir.path().to_string_lossy().to_string(),
                signing_secret: "test-secret".to_string(),
            },
            "http://album.test/",
        )
    }

    fn query_param<'a>(url: &'a str, name: &str) -> &'a str {
        let query = url.split_once('?').unwrap().1;
        query
            .split('&')
            .find_map(|pair| pair.strip_prefix(&format!("{}=", name)))
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(&dir);

        assert!(!store.exists("orig/g/p.jpg").await.unwrap());
        store.put("orig/g/p.jpg", Bytes::from_static(b"abc"), "image/jpeg").await.unwrap();
        assert!(store.exists("orig/g/p.jpg").await.unwrap());
        assert_eq!(store.get("orig/g/p.jpg").await.unwrap(), Bytes::from_static(b"abc"));

        store.delete("orig/g/p.jpg").await.unwrap();
        assert!(!store.exists("orig/g/p.jpg").await.unwrap());
        assert!(!dir.path().join("orig").exists());
        // deleting twice is fine
        store.delete("orig/g/p.jpg").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = storage(&dir).get("orig/none.jpg").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_traversal_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = storage(&dir).get("../secret").await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_put_stream_enforces_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(&dir);
        let chunks = vec![
            Ok::<_, std::io::Error>(Bytes::from_static(b"12345")),
            Ok(Bytes::from_static(b"67890")),
        ];
        let err = store
            .put_stream("orig/g/big.jpg", futures::stream::iter(chunks), 8)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(!store.exists("orig/g/big.jpg").await.unwrap());
        // no temp files left behind
        let mut entries = fs::read_dir(dir.path().join("orig/g")).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_signed_upload_url_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(&dir);
        let url = store.signed_url("PUT", "orig/g/p 1.jpg", Some("image/jpeg"), Duration::from_secs(600), 1_000);
        assert!(url.starts_with("http://album.test/api/v1/blob/orig/g/p%201.jpg?expires=1600&signature="));

        let signature = query_param(&url, "signature");
        store
            .verify("PUT", "orig/g/p 1.jpg", 1600, signature, Some("image/jpeg"), 1_500)
            .unwrap();

        // wrong content type, method, key or expiry all fail
        assert!(store.verify("PUT", "orig/g/p 1.jpg", 1600, signature, Some("image/png"), 1_500).is_err());
        assert!(store.verify("GET", "orig/g/p 1.jpg", 1600, signature, Some("image/jpeg"), 1_500).is_err());
        assert!(store.verify("PUT", "orig/g/p2.jpg", 1600, signature, Some("image/jpeg"), 1_500).is_err());
        assert!(store.verify("PUT", "orig/g/p 1.jpg", 9999, signature, Some("image/jpeg"), 1_500).is_err());
    }

    #[tokio::test]
    async fn test_expired_url_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(&dir);
        let signature = store.sign("GET", "thumb/g/p.jpg", 100, None);
        store.verify("GET", "thumb/g/p.jpg", 100, &signature, None, 100).unwrap();
        let err = store
            .verify("GET", "thumb/g/p.jpg", 100, &signature, None, 101)
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_garbage_signature_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(&dir);
        assert!(store.verify("GET", "a/b.jpg", 100, "zz-not-hex", None, 0).is_err());
    }
}
