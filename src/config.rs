use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub variants: VariantConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Externally reachable base URL, used to build local blob URLs
    #[serde(default = "default_public_url")]
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub previous_secrets: Vec<String>,
    #[serde(default = "default_access_token_expire")]
    pub access_token_expire_minutes: u64,
}

/// Which object store backs the album
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Local,
    S3,
}

impl StorageBackend {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Some(StorageBackend::Local),
            "s3" | "r2" => Some(StorageBackend::S3),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_upload_url_expire")]
    pub upload_url_expire_secs: u64,
    #[serde(default = "default_download_url_expire")]
    pub download_url_expire_secs: u64,
    #[serde(default)]
    pub local: LocalStorageConfig,
    #[serde(default)]
    pub s3: S3StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalStorageConfig {
    #[serde(default = "default_local_path")]
    pub base_path: String,
    #[serde(default)]
    pub signing_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3StorageConfig {
    /// e.g. https://<account>.r2.cloudflarestorage.com
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_size")]
    pub max_size_bytes: u64,
    #[serde(default = "default_allowed_mime_types")]
    pub allowed_mime_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VariantConfig {
    #[serde(default = "default_thumb_max")]
    pub thumb_max: u32,
    #[serde(default = "default_large_max")]
    pub large_max: u32,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_public_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_db_path() -> String {
    "data/album.db".to_string()
}

fn default_access_token_expire() -> u64 {
    60
}

fn default_backend() -> StorageBackend {
    StorageBackend::Local
}

fn default_upload_url_expire() -> u64 {
    600
}

fn default_download_url_expire() -> u64 {
    300
}

fn default_local_path() -> String {
    "data/objects".to_string()
}

fn default_region() -> String {
    "auto".to_string()
}

fn default_max_size() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_allowed_mime_types() -> Vec<String> {
    ["image/jpeg", "image/png", "image/webp", "video/mp4"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_thumb_max() -> u32 {
    320
}

fn default_large_max() -> u32 {
    2048
}

fn default_jpeg_quality() -> u8 {
    82
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: default_public_url(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            previous_secrets: Vec::new(),
            access_token_expire_minutes: default_access_token_expire(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            upload_url_expire_secs: default_upload_url_expire(),
            download_url_expire_secs: default_download_url_expire(),
            local: LocalStorageConfig::default(),
            s3: S3StorageConfig::default(),
        }
    }
}

impl Default for S3StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            region: default_region(),
            bucket: String::new(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
        }
    }
}

impl Default for LocalStorageConfig {
    fn default() -> Self {
        Self {
            base_path: default_local_path(),
            signing_secret: String::new(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_max_size(),
            allowed_mime_types: default_allowed_mime_types(),
        }
    }
}

impl Default for VariantConfig {
    fn default() -> Self {
        Self {
            thumb_max: default_thumb_max(),
            large_max: default_large_max(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        config.ensure_directories()?;
        config.ensure_secrets()?;
        tracing::info!(
            "Storage backend: {:?}, upload limit: {} bytes",
            config.storage.backend,
            config.upload.max_size_bytes
        );
        Ok(config)
    }

    /// Load configuration from config.toml
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["config.toml", "data/config.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply overrides of the form FA_CONF_<SECTION>_<KEY>
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server
        if let Some(val) = lookup("FA_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        if let Some(port) = lookup("FA_CONF_SERVER_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(val) = lookup("FA_CONF_SERVER_PUBLIC_URL") {
            self.server.public_url = val.trim_end_matches('/').to_string();
        }

        // Database
        if let Some(val) = lookup("FA_CONF_DATABASE_PATH") {
            self.database.path = val;
        }

        // JWT
        if let Some(val) = lookup("FA_CONF_JWT_SECRET") {
            self.jwt.secret = val;
        }
        if let Some(val) = lookup("FA_CONF_JWT_PREVIOUS_SECRETS") {
            self.jwt.previous_secrets = val
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect();
        }
        if let Some(minutes) = lookup("FA_CONF_JWT_ACCESS_EXPIRE").and_then(|v| v.parse().ok()) {
            self.jwt.access_token_expire_minutes = minutes;
        }

        // Storage
        if let Some(backend) = lookup("FA_CONF_STORAGE_BACKEND")
            .as_deref()
            .and_then(StorageBackend::from_str)
        {
            self.storage.backend = backend;
        }
        if let Some(secs) = lookup("FA_CONF_STORAGE_UPLOAD_EXPIRE").and_then(|v| v.parse().ok()) {
            self.storage.upload_url_expire_secs = secs;
        }
        if let Some(secs) = lookup("FA_CONF_STORAGE_DOWNLOAD_EXPIRE").and_then(|v| v.parse().ok()) {
            self.storage.download_url_expire_secs = secs;
        }
        if let Some(val) = lookup("FA_CONF_STORAGE_LOCAL_PATH") {
            self.storage.local.base_path = val;
        }
        if let Some(val) = lookup("FA_CONF_STORAGE_LOCAL_SECRET") {
            self.storage.local.signing_secret = val;
        }
        if let Some(val) = lookup("FA_CONF_STORAGE_S3_ENDPOINT") {
            self.storage.s3.endpoint = val;
        }
        if let Some(val) = lookup("FA_CONF_STORAGE_S3_REGION") {
            if !val.trim().is_empty() {
                self.storage.s3.region = val;
            }
        }
        if let Some(val) = lookup("FA_CONF_STORAGE_S3_BUCKET") {
            self.storage.s3.bucket = val;
        }
        if let Some(val) = lookup("FA_CONF_STORAGE_S3_ACCESS_KEY") {
            self.storage.s3.access_key_id = val;
        }
        if let Some(val) = lookup("FA_CONF_STORAGE_S3_SECRET_KEY") {
            self.storage.s3.secret_access_key = val;
        }

        // Upload
        if let Some(bytes) = lookup("FA_CONF_UPLOAD_MAX_SIZE").and_then(|v| v.parse().ok()) {
            self.upload.max_size_bytes = bytes;
        }
        if let Some(val) = lookup("FA_CONF_UPLOAD_ALLOWED_MIME") {
            self.upload.allowed_mime_types = val
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }

    /// Reject configurations that cannot work at all
    fn validate(&self) -> anyhow::Result<()> {
        if self.storage.backend == StorageBackend::S3 {
            let s3 = &self.storage.s3;
            if s3.endpoint.is_empty() || s3.bucket.is_empty() {
                anyhow::bail!("S3 storage requires endpoint and bucket");
            }
            if s3.access_key_id.is_empty() || s3.secret_access_key.is_empty() {
                anyhow::bail!("S3 storage requires access_key_id and secret_access_key");
            }
        }
        if self.variants.thumb_max == 0 || self.variants.large_max == 0 {
            anyhow::bail!("Variant bounds must be positive");
        }
        Ok(())
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        if let Some(parent) = Path::new(&self.database.path).parent() {
            fs::create_dir_all(parent)?;
        }
        if self.storage.backend == StorageBackend::Local {
            fs::create_dir_all(&self.storage.local.base_path)?;
        }
        Ok(())
    }

    /// Fill empty secrets from data/ or generate and persist new ones
    fn ensure_secrets(&mut self) -> anyhow::Result<()> {
        if self.jwt.secret.trim().is_empty() {
            self.jwt.secret = load_or_generate_secret(Path::new("data/.jwt_secret"))?;
        }
        if self.storage.local.signing_secret.trim().is_empty() {
            self.storage.local.signing_secret =
                load_or_generate_secret(Path::new("data/.blob_secret"))?;
        }
        Ok(())
    }
}

fn load_or_generate_secret(path: &Path) -> anyhow::Result<String> {
    if path.exists() {
        let secret = fs::read_to_string(path)?;
        tracing::info!("Loaded persisted secret from {}", path.display());
        return Ok(secret.trim().to_string());
    }

    let secret = format!("{}{}", uuid::Uuid::new_v4().simple(), uuid::Uuid::new_v4().simple());
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, &secret)?;
    tracing::info!("Generated and persisted new secret to {}", path.display());
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_upload_limits() {
        let config = Config::default();
        assert_eq!(config.upload.max_size_bytes, 2 * 1024 * 1024 * 1024);
        assert!(config.upload.allowed_mime_types.contains(&"video/mp4".to_string()));
        assert!(!config.upload.allowed_mime_types.contains(&"application/zip".to_string()));
        assert_eq!(config.storage.upload_url_expire_secs, 600);
        assert_eq!(config.storage.download_url_expire_secs, 300);
        assert_eq!(config.variants.thumb_max, 320);
        assert_eq!(config.variants.large_max, 2048);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("FA_CONF_SERVER_PORT", "9000"),
            ("FA_CONF_STORAGE_BACKEND", "r2"),
            ("FA_CONF_STORAGE_S3_BUCKET", "family"),
            ("FA_CONF_UPLOAD_ALLOWED_MIME", "image/jpeg, IMAGE/PNG"),
            ("FA_CONF_JWT_PREVIOUS_SECRETS", "a, ,b"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert_eq!(config.storage.s3.bucket, "family");
        assert_eq!(config.upload.allowed_mime_types, vec!["image/jpeg", "image/png"]);
        assert_eq!(config.jwt.previous_secrets, vec!["a", "b"]);
    }

    #[test]
    fn test_invalid_override_is_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|k| match k {
            "FA_CONF_SERVER_PORT" => Some("not-a-port".to_string()),
            "FA_CONF_STORAGE_BACKEND" => Some("ftp".to_string()),
            _ => None,
        });
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.backend, StorageBackend::Local);
    }

    #[test]
    fn test_toml_sections() {
        let config: Config = toml::from_str(
            r#"
            [storage]
            backend = "s3"

            [storage.s3]
            endpoint = "https://acct.r2.cloudflarestorage.com"
            bucket = "album"

            [variants]
            thumb_max = 256
            "#,
        )
        .unwrap();
        assert_eq!(config.storage.backend, StorageBackend::S3);
        assert_eq!(config.storage.s3.region, "auto");
        assert_eq!(config.variants.thumb_max, 256);
        assert_eq!(config.variants.large_max, 2048);
    }

    #[test]
    fn test_s3_requires_credentials() {
        let mut config = Config::default();
        config.storage.backend = StorageBackend::S3;
        config.storage.s3.endpoint = "https://example.com".into();
        config.storage.s3.bucket = "b".into();
        assert!(config.validate().is_err());
    }
}
