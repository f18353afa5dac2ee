use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashMap;
use std::time::Duration;

use crate::config::Config;
use crate::db::{self, Database};
use crate::error::{AppError, Result};
use crate::models::{
    normalize_caption, CurrentUser, PageQuery, Photo, PhotoListResponse, PhotoResponse,
    PhotoUrlResponse, PhotoVariant, Rendition, UploadState,
};
use crate::storage::StorageProvider;

/// Gallery ordering: newest capture first, ties in creation order
pub(crate) const GALLERY_ORDER: &str = "p.taken_at DESC, p.rowid ASC";

/// Photo service
pub struct PhotoService;

impl PhotoService {
    /// Completed photos of the caller's group, newest capture first
    pub async fn list_photos(db: &Database, session: &CurrentUser, page: &PageQuery) -> Result<PhotoListResponse> {
        let (limit, offset) = (page.limit(), page.offset());
        let sql = format!(
            "SELECT p.* FROM photos p WHERE p.group_id = ? AND p.status IN (?, ?) ORDER BY {} LIMIT ? OFFSET ?",
            GALLERY_ORDER
        );
        let photos: Vec<Photo> = sqlx::query_as(&sql)
            .bind(&session.group_id)
            .bind(UploadState::VariantsPending.as_str())
            .bind(UploadState::Ready.as_str())
            .bind(limit)
            .bind(offset)
            .fetch_all(db.pool())
            .await?;

        Ok(PhotoListResponse {
            photos: Self::responses(db, photos).await?,
            limit,
            offset,
        })
    }

    pub async fn get_photo(db: &Database, session: &CurrentUser, photo_id: &str) -> Result<PhotoResponse> {
        let photo = Self::find_in_group(db, &session.group_id, photo_id).await?;
        Self::response(db, photo).await
    }

    /// Presigned download URL for a rendition. A derived variant that has not
    /// been stored yet falls back to the original.
    pub async fn photo_url(
        db: &Database,
        config: &Config,
        storage: &dyn StorageProvider,
        session: &CurrentUser,
        photo_id: &str,
        requested: Rendition,
    ) -> Result<PhotoUrlResponse> {
        let photo = Self::find_in_group(db, &session.group_id, photo_id).await?;
        if !photo.state()?.is_completed() {
            return Err(AppError::Conflict("Photo upload is not complete".to_string()));
        }

        let variant = match requested.variant() {
            Some(kind) => {
                sqlx::query_as::<_, PhotoVariant>("SELECT * FROM photo_variants WHERE photo_id = ? AND variant = ?")
                    .bind(&photo.id)
                    .bind(kind.as_str())
                    .fetch_optional(db.pool())
                    .await?
            }
            None => None,
        };

        let (key, rendition) = match variant {
            Some(v) => (v.storage_key, requested),
            None => {
                if requested != Rendition::Orig {
                    tracing::debug!("Photo {} has no {:?} variant, serving original", photo.id, requested);
                }
                (photo.storage_key, Rendition::Orig)
            }
        };

        let expires_in = config.storage.download_url_expire_secs;
        let url = storage
            .presigned_download_url(&key, Duration::from_secs(expires_in))
            .await?;

        Ok(PhotoUrlResponse {
            url,
            variant: rendition,
            expires_in,
        })
    }

    pub async fn update_caption(
        db: &Database,
        session: &CurrentUser,
        photo_id: &str,
        caption: Option<&str>,
    ) -> Result<PhotoResponse> {
        let photo = Self::find_in_group(db, &session.group_id, photo_id).await?;
        let caption = normalize_caption(caption)?;

        sqlx::query("UPDATE photos SET caption = ?, updated_at = ? WHERE id = ?")
            .bind(&caption)
            .bind(db::now_timestamp())
            .bind(&photo.id)
            .execute(db.pool())
            .await?;

        let photo = Self::find_in_group(db, &session.group_id, &photo.id).await?;
        Self::response(db, photo).await
    }

    /// Remove a photo, its stored objects, variants and album memberships.
    /// Only the uploader or a group admin may delete.
    pub async fn delete_photo(
        db: &Database,
        storage: &dyn StorageProvider,
        session: &CurrentUser,
        photo_id: &str,
    ) -> Result<()> {
        let photo = Self::find_in_group(db, &session.group_id, photo_id).await?;
        if photo.owner_user_id != session.id && !session.is_admin() {
            return Err(AppError::Forbidden(
                "Only the uploader or an admin can delete this photo".to_string(),
            ));
        }

        let variant_keys: Vec<(String,)> = sqlx::query_as("SELECT storage_key FROM photo_variants WHERE photo_id = ?")
            .bind(&photo.id)
            .fetch_all(db.pool())
            .await?;

        let keys = variant_keys
            .into_iter()
            .map(|(key,)| key)
            .chain(std::iter::once(photo.storage_key.clone()));
        for key in keys {
            if let Err(e) = storage.delete(&key).await {
                tracing::warn!("Failed to delete object {} of photo {}: {}", key, photo.id, e);
            }
        }

        sqlx::query("DELETE FROM photos WHERE id = ?")
            .bind(&photo.id)
            .execute(db.pool())
            .await?;

        tracing::info!("Photo {} deleted by {}", photo.id, session.username);
        Ok(())
    }

    /// Load a photo, treating other groups' photos as absent
    pub async fn find_in_group(db: &Database, group_id: &str, photo_id: &str) -> Result<Photo> {
        sqlx::query_as("SELECT * FROM photos WHERE id = ? AND group_id = ?")
            .bind(photo_id)
            .bind(group_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("Photo not found".to_string()))
    }

    async fn response(db: &Database, photo: Photo) -> Result<PhotoResponse> {
        let mut responses = Self::responses(db, vec![photo]).await?;
        responses
            .pop()
            .ok_or_else(|| AppError::Internal("Photo vanished while building response".to_string()))
    }

    /// Attach the stored variant kinds to each photo, preserving order
    pub(crate) async fn responses(db: &Database, photos: Vec<Photo>) -> Result<Vec<PhotoResponse>> {
        if photos.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT photo_id, variant FROM photo_variants WHERE photo_id IN (");
        {
            let mut ids = query.separated(", ");
            for photo in &photos {
                ids.push_bind(photo.id.clone());
            }
        }
        query.push(") ORDER BY variant DESC");

        let rows: Vec<(String, String)> = query.build_query_as().fetch_all(db.pool()).await?;
        let mut variants: HashMap<String, Vec<String>> = HashMap::new();
        for (photo_id, variant) in rows {
            variants.entry(photo_id).or_default().push(variant);
        }

        Ok(photos
            .into_iter()
            .map(|photo| {
                let kinds = variants.remove(&photo.id).unwrap_or_default();
                PhotoResponse::new(photo, kinds)
            })
            .collect())
    }
}
