use bytes::Bytes;
use image::DynamicImage;
use std::sync::Arc;

use crate::config::VariantConfig;
use crate::db::{self, Database};
use crate::error::{AppError, Result};
use crate::media::{metadata, variants};
use crate::models::{Photo, VariantKind};
use crate::storage::StorageProvider;

/// Which display variants a generation pass stored
#[derive(Debug, Default, Clone, PartialEq)]
pub struct VariantReport {
    pub stored: Vec<VariantKind>,
    pub failed: Vec<VariantKind>,
}

impl VariantReport {
    pub fn all_stored(&self) -> bool {
        self.failed.is_empty() && self.stored.len() == VariantKind::ALL.len()
    }
}

/// Variant generation service
pub struct VariantService;

impl VariantService {
    /// Render and store every display variant for `photo` from its original.
    /// Each kind is attempted on its own; failures are logged and reported,
    /// never returned as errors.
    pub async fn generate(
        db: &Database,
        config: &VariantConfig,
        storage: &dyn StorageProvider,
        photo: &Photo,
        original: Bytes,
    ) -> VariantReport {
        let mut report = VariantReport::default();

        let image = match Self::decode(original).await {
            Ok(image) => Arc::new(image),
            Err(e) => {
                tracing::error!("Cannot decode original of photo {}: {}", photo.id, e);
                report.failed.extend(VariantKind::ALL);
                return report;
            }
        };

        for kind in VariantKind::ALL {
            let bound = match kind {
                VariantKind::Thumb => config.thumb_max,
                VariantKind::Large => config.large_max,
            };
            match Self::store_variant(db, storage, photo, kind, image.clone(), bound, config.jpeg_quality).await {
                Ok(()) => report.stored.push(kind),
                Err(e) => {
                    tracing::warn!("Variant {} of photo {} failed: {}", kind.as_str(), photo.id, e);
                    report.failed.push(kind);
                }
            }
        }

        report
    }

    async fn decode(original: Bytes) -> Result<DynamicImage> {
        tokio::task::spawn_blocking(move || {
            let orientation = metadata::orientation(&original);
            variants::decode(&original, orientation)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Decode task failed: {}", e)))?
    }

    async fn store_variant(
        db: &Database,
        storage: &dyn StorageProvider,
        photo: &Photo,
        kind: VariantKind,
        image: Arc<DynamicImage>,
        bound: u32,
        quality: u8,
    ) -> Result<()> {
        let rendered = tokio::task::spawn_blocking(move || variants::render(&image, bound, quality))
            .await
            .map_err(|e| AppError::Internal(format!("Resize task failed: {}", e)))??;

        let key = kind.storage_key(&photo.group_id, &photo.id);
        let size = rendered.data.len() as i64;
        storage.put(&key, Bytes::from(rendered.data), "image/jpeg").await?;

        sqlx::query(
            r#"
            INSERT INTO photo_variants (photo_id, variant, storage_key, width, height, bytes, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (photo_id, variant) DO UPDATE SET
                storage_key = excluded.storage_key,
                width = excluded.width,
                height = excluded.height,
                bytes = excluded.bytes,
                created_at = excluded.created_at
            "#,
        )
        .bind(&photo.id)
        .bind(kind.as_str())
        .bind(&key)
        .bind(rendered.width as i64)
        .bind(rendered.height as i64)
        .bind(size)
        .bind(db::now_timestamp())
        .execute(db.pool())
        .await?;

        tracing::debug!(
            "Stored {} variant of {} at {}x{} ({} bytes)",
            kind.as_str(),
            photo.id,
            rendered.width,
            rendered.height,
            size
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VariantConfig;
    use crate::services::testing::{test_db, test_storage};

    fn photo() -> Photo {
        Photo {
            id: "p1".into(),
            group_id: "g1".into(),
            owner_user_id: "u1".into(),
            original_filename: "a.jpg".into(),
            storage_key: "orig/g1/p1.jpg".into(),
            content_hash: "0".repeat(64),
            bytes: 4,
            mime_type: "image/jpeg".into(),
            status: "awaiting_completion".into(),
            width: None,
            height: None,
            metadata: None,
            taken_at: None,
            taken_at_source: None,
            caption: None,
            created_at: db::now_timestamp(),
            updated_at: db::now_timestamp(),
        }
    }

    #[tokio::test]
    async fn test_undecodable_original_fails_every_kind() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir);
        let config = VariantConfig::default();

        let report = VariantService::generate(&db, &config, &storage, &photo(), Bytes::from_static(b"nope")).await;
        assert!(report.stored.is_empty());
        assert_eq!(report.failed, VariantKind::ALL.to_vec());
        assert!(!report.all_stored());
        assert!(!storage.exists("thumb/g1/p1.jpg").await.unwrap());
    }

    #[test]
    fn test_report_requires_every_kind() {
        let partial = VariantReport {
            stored: vec![VariantKind::Thumb],
            failed: vec![],
        };
        assert!(!partial.all_stored());
        let full = VariantReport {
            stored: VariantKind::ALL.to_vec(),
            failed: vec![],
        };
        assert!(full.all_stored());
    }
}
