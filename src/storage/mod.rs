pub mod local;
pub mod provider;
pub mod s3;

pub use local::LocalStorage;
pub use provider::*;
pub use s3::S3Storage;

use std::sync::Arc;

use crate::config::{Config, StorageBackend};
use crate::error::Result;

/// Configured object store plus, for the local backend, the concrete store
/// the blob routes serve from
#[derive(Clone)]
pub struct Storage {
    pub provider: Arc<dyn StorageProvider>,
    pub local: Option<Arc<LocalStorage>>,
}

impl Storage {
    pub fn from_config(config: &Config) -> Result<Self> {
        match config.storage.backend {
            StorageBackend::Local => {
                let local = Arc::new(LocalStorage::new(&config.storage.local, &config.server.public_url));
                Ok(Self {
                    provider: local.clone(),
                    local: Some(local),
                })
            }
            StorageBackend::S3 => Ok(Self {
                provider: Arc::new(S3Storage::new(&config.storage.s3)?),
                local: None,
            }),
        }
    }
}
