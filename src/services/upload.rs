use chrono::Utc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;
use crate::db::{self, Database};
use crate::error::{AppError, Result};
use crate::media::{self, ImageMetadata, MediaMetadata, TakenAtSource};
use crate::models::{
    CompleteUploadRequest, CompleteUploadResponse, CurrentUser, InitUploadRequest,
    InitUploadResponse, Photo, UploadEvent, UploadState,
};
use crate::services::VariantService;
use crate::storage::StorageProvider;

const MAX_FILENAME_CHARS: usize = 255;

/// Result of a conditional state change
#[derive(Debug, Clone, Copy, PartialEq)]
enum Advance {
    Moved(UploadState),
    /// Another completion changed the row first; holds its current state
    Lost(UploadState),
}

/// Two-step direct-to-store upload: reserve a slot and URL, then confirm
pub struct UploadService;

impl UploadService {
    /// Reserve a photo slot for the caller's group and issue a presigned PUT URL.
    /// Content already present in the group resolves to the existing photo.
    pub async fn init_upload(
        db: &Database,
        config: &Config,
        storage: &dyn StorageProvider,
        session: &CurrentUser,
        req: InitUploadRequest,
    ) -> Result<InitUploadResponse> {
        let mime = req.mime.trim().to_lowercase();
        if !config.upload.allowed_mime_types.iter().any(|m| m.eq_ignore_ascii_case(&mime)) {
            return Err(AppError::BadRequest("Invalid MIME type".to_string()));
        }
        if req.size <= 0 {
            return Err(AppError::BadRequest("File size must be positive".to_string()));
        }
        if req.size as u64 > config.upload.max_size_bytes {
            return Err(AppError::BadRequest(format!(
                "File too large: {} bytes exceeds the {} byte limit",
                req.size, config.upload.max_size_bytes
            )));
        }
        let hash = normalize_sha256(&req.sha256)?;
        let filename = req.filename.trim();
        if filename.is_empty() || filename.chars().count() > MAX_FILENAME_CHARS {
            return Err(AppError::BadRequest("Invalid filename".to_string()));
        }

        if let Some(existing) = Self::find_by_hash(db, &session.group_id, &hash).await? {
            tracing::info!("Upload of {} is a duplicate of photo {}", filename, existing);
            return Ok(InitUploadResponse::duplicate(existing));
        }

        let photo_id = Uuid::new_v4().to_string();
        let key = format!("orig/{}/{}.{}", session.group_id, photo_id, extension_for(&mime));
        let now = db::now_timestamp();

        let inserted = sqlx::query(
            r#"
            INSERT INTO photos (id, group_id, owner_user_id, original_filename, storage_key,
                                content_hash, bytes, mime_type, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&photo_id)
        .bind(&session.group_id)
        .bind(&session.id)
        .bind(filename)
        .bind(&key)
        .bind(&hash)
        .bind(req.size)
        .bind(&mime)
        .bind(UploadState::Pending.as_str())
        .bind(&now)
        .bind(&now)
        .execute(db.pool())
        .await;

        if let Err(e) = inserted {
            if db::is_unique_violation(&e) {
                // Lost a race with an identical upload
                if let Some(existing) = Self::find_by_hash(db, &session.group_id, &hash).await? {
                    return Ok(InitUploadResponse::duplicate(existing));
                }
            }
            return Err(e.into());
        }

        let expires = Duration::from_secs(config.storage.upload_url_expire_secs);
        let put_url = match storage.presigned_upload_url(&key, &mime, expires).await {
            Ok(url) => url,
            Err(e) => {
                // Nothing was handed out, so the slot is released rather than left in error
                sqlx::query("DELETE FROM photos WHERE id = ?")
                    .bind(&photo_id)
                    .execute(db.pool())
                    .await?;
                return Err(e);
            }
        };

        if let Advance::Lost(current) = Self::advance(db, &photo_id, UploadState::Pending, UploadEvent::UrlIssued).await? {
            return Err(AppError::Conflict(format!("Photo {} is already {}", photo_id, current)));
        }
        tracing::info!("Issued upload URL for photo {} ({} bytes, {})", photo_id, req.size, mime);

        Ok(InitUploadResponse::Created {
            put_url,
            photo_id,
            key,
        })
    }

    /// Confirm the object landed, record its metadata and build display variants.
    /// Safe to repeat, including while an earlier attempt is still running or
    /// after one was interrupted; variant rows are upserted.
    pub async fn complete_upload(
        db: &Database,
        config: &Config,
        storage: &dyn StorageProvider,
        session: &CurrentUser,
        req: CompleteUploadRequest,
    ) -> Result<CompleteUploadResponse> {
        let photo: Photo = sqlx::query_as("SELECT * FROM photos WHERE id = ? AND group_id = ?")
            .bind(&req.photo_id)
            .bind(&session.group_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("Photo not found".to_string()))?;

        if req.key != photo.storage_key {
            return Err(AppError::BadRequest("Key does not belong to this photo".to_string()));
        }

        let state = photo.state()?;
        state.transition(UploadEvent::ObjectVerified)?;

        if !storage.exists(&photo.storage_key).await? {
            return Err(AppError::NotFound("Upload not found".to_string()));
        }

        let outcome = match Self::advance(db, &photo.id, state, UploadEvent::ObjectVerified).await? {
            Advance::Moved(state) => Self::process(db, config, storage, &photo, state).await,
            lost => Ok(lost),
        };

        match outcome {
            Ok(Advance::Moved(status)) => Ok(CompleteUploadResponse {
                success: true,
                photo_id: photo.id,
                status,
            }),
            Ok(Advance::Lost(UploadState::Error)) => Err(AppError::Conflict(
                "A concurrent completion of this photo failed; retry".to_string(),
            )),
            Ok(Advance::Lost(status)) => {
                tracing::info!("Photo {} is being completed concurrently, now {}", photo.id, status);
                Ok(CompleteUploadResponse {
                    success: true,
                    photo_id: photo.id,
                    status,
                })
            }
            Err(e) => {
                tracing::error!("Completing photo {} failed: {}", photo.id, e);
                match Self::advance(db, &photo.id, UploadState::AwaitingCompletion, UploadEvent::Failed).await {
                    Ok(Advance::Lost(current)) => {
                        tracing::debug!("Photo {} left as {} by a concurrent completion", photo.id, current)
                    }
                    Ok(Advance::Moved(_)) => {}
                    Err(mark) => tracing::error!("Could not mark photo {} as failed: {}", photo.id, mark),
                }
                Err(e)
            }
        }
    }

    /// Record metadata and build variants for a photo this call moved to
    /// `awaiting_completion`. Stops early when a concurrent completion takes
    /// over the row.
    async fn process(
        db: &Database,
        config: &Config,
        storage: &dyn StorageProvider,
        photo: &Photo,
        state: UploadState,
    ) -> Result<Advance> {
        let (meta, original) = if photo.is_video() {
            (video_metadata(&photo.mime_type), None)
        } else {
            let original = storage.get(&photo.storage_key).await?;
            let bytes = original.clone();
            let meta = tokio::task::spawn_blocking(move || media::extract(&bytes))
                .await
                .map_err(|e| AppError::Internal(format!("Metadata task failed: {}", e)))??;
            (meta, Some(original))
        };

        let metadata = serde_json::to_string(&meta.metadata)
            .map_err(|e| AppError::Internal(format!("Cannot serialize metadata: {}", e)))?;
        let dimensions = (!photo.is_video()).then_some((meta.width as i64, meta.height as i64));

        // Retries keep an earlier fallback time
        let taken_at = match (&photo.taken_at, photo.taken_at_source.as_deref()) {
            (Some(existing), Some(source))
                if meta.taken_at_source == TakenAtSource::Fallback
                    && source == TakenAtSource::Fallback.as_str() =>
            {
                existing.clone()
            }
            _ => db::to_timestamp(meta.taken_at),
        };

        sqlx::query(
            r#"
            UPDATE photos
            SET width = ?, height = ?, metadata = ?, taken_at = ?, taken_at_source = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(dimensions.map(|d| d.0))
        .bind(dimensions.map(|d| d.1))
        .bind(&metadata)
        .bind(&taken_at)
        .bind(meta.taken_at_source.as_str())
        .bind(db::now_timestamp())
        .bind(&photo.id)
        .execute(db.pool())
        .await?;

        let state = match Self::advance(db, &photo.id, state, UploadEvent::MetadataRecorded).await? {
            Advance::Moved(state) => state,
            lost => return Ok(lost),
        };

        let Some(original) = original else {
            return Self::advance(db, &photo.id, state, UploadEvent::VariantsStored).await;
        };

        let report = VariantService::generate(db, &config.variants, storage, photo, original).await;
        if report.all_stored() {
            Self::advance(db, &photo.id, state, UploadEvent::VariantsStored).await
        } else {
            tracing::warn!(
                "Photo {} stays {} with failed variants {:?}",
                photo.id,
                state,
                report.failed
            );
            Ok(Advance::Moved(state))
        }
    }

    /// Apply `event` to a photo currently in `from`. The update is conditional
    /// on the stored state; when another completion changed the row first the
    /// result is `Lost` with the state it holds now.
    async fn advance(db: &Database, photo_id: &str, from: UploadState, event: UploadEvent) -> Result<Advance> {
        let to = from.transition(event)?;
        let result = sqlx::query("UPDATE photos SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(to.as_str())
            .bind(db::now_timestamp())
            .bind(photo_id)
            .bind(from.as_str())
            .execute(db.pool())
            .await?;

        if result.rows_affected() == 0 {
            let (status,): (String,) = sqlx::query_as("SELECT status FROM photos WHERE id = ?")
                .bind(photo_id)
                .fetch_optional(db.pool())
                .await?
                .ok_or_else(|| AppError::NotFound("Photo not found".to_string()))?;
            let current = UploadState::from_str(&status)
                .ok_or_else(|| AppError::Internal(format!("Unknown photo status: {}", status)))?;
            tracing::debug!("Photo {}: {} on {:?} lost to {}", photo_id, from, event, current);
            return Ok(Advance::Lost(current));
        }

        tracing::debug!("Photo {}: {} -> {}", photo_id, from, to);
        Ok(Advance::Moved(to))
    }

    async fn find_by_hash(db: &Database, group_id: &str, hash: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM photos WHERE group_id = ? AND content_hash = ?")
            .bind(group_id)
            .bind(hash)
            .fetch_optional(db.pool())
            .await?;
        Ok(row.map(|r| r.0))
    }
}

fn normalize_sha256(raw: &str) -> Result<String> {
    let hash = raw.trim().to_lowercase();
    if hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(hash)
    } else {
        Err(AppError::BadRequest("sha256 must be 64 hex characters".to_string()))
    }
}

/// File extension for a storage key, from the MIME subtype
fn extension_for(mime: &str) -> &str {
    match mime.split_once('/').map(|(_, sub)| sub) {
        Some("jpeg") => "jpg",
        Some(sub) if !sub.is_empty() && sub.chars().all(|c| c.is_ascii_alphanumeric()) => sub,
        _ => "bin",
    }
}

fn video_metadata(mime: &str) -> ImageMetadata {
    ImageMetadata {
        width: 0,
        height: 0,
        format: mime.to_string(),
        taken_at: Utc::now(),
        taken_at_source: TakenAtSource::Fallback,
        metadata: MediaMetadata::Video {
            mime_type: mime.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::media::metadata::tests::{jpeg_bytes, png_bytes};
    use crate::models::{PhotoVariant, VariantKind};
    use crate::services::testing::{families, test_config, test_db, test_storage, FlakyStorage, GatedStorage};
    use std::sync::Arc;
    use sha2::{Digest, Sha256};

    fn init_request(data: &[u8], mime: &str) -> InitUploadRequest {
        InitUploadRequest {
            filename: "IMG_0001.jpg".to_string(),
            size: data.len() as i64,
            mime: mime.to_string(),
            sha256: hex::encode(Sha256::digest(data)),
        }
    }

    async fn photo_count(db: &Database) -> i64 {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM photos")
            .fetch_one(db.pool())
            .await
            .unwrap();
        row.0
    }

    async fn status_of(db: &Database, id: &str) -> String {
        let row: (String,) = sqlx::query_as("SELECT status FROM photos WHERE id = ?")
            .bind(id)
            .fetch_one(db.pool())
            .await
            .unwrap();
        row.0
    }

    async fn variants_of(db: &Database, id: &str) -> Vec<PhotoVariant> {
        sqlx::query_as("SELECT * FROM photo_variants WHERE photo_id = ? ORDER BY variant")
            .bind(id)
            .fetch_all(db.pool())
            .await
            .unwrap()
    }

    /// Init, PUT the bytes into the store, complete
    async fn upload(
        db: &Database,
        config: &Config,
        storage: &dyn StorageProvider,
        session: &CurrentUser,
        data: &[u8],
        mime: &str,
    ) -> (String, CompleteUploadResponse) {
        let init = UploadService::init_upload(db, config, storage, session, init_request(data, mime))
            .await
            .unwrap();
        let InitUploadResponse::Created { photo_id, key, .. } = init else {
            panic!("expected a new upload, got {:?}", init);
        };
        storage.put(&key, Bytes::copy_from_slice(data), mime).await.unwrap();
        let done = UploadService::complete_upload(
            db,
            config,
            storage,
            session,
            CompleteUploadRequest { photo_id: photo_id.clone(), key },
        )
        .await
        .unwrap();
        (photo_id, done)
    }

    #[tokio::test]
    async fn test_init_issues_url_and_reserves_slot() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir);
        let (ana, _, _) = families(&db).await;

        let data = jpeg_bytes(8, 8);
        let resp = UploadService::init_upload(&db, &test_config(), &storage, &ana, init_request(&data, "image/jpeg"))
            .await
            .unwrap();
        let InitUploadResponse::Created { put_url, photo_id, key } = resp else {
            panic!("expected created");
        };
        assert_eq!(key, format!("orig/{}/{}.jpg", ana.group_id, photo_id));
        assert!(put_url.starts_with("http://album.test/api/v1/blob/orig/"));
        assert_eq!(status_of(&db, &photo_id).await, "uploading");
    }

    #[tokio::test]
    async fn test_init_twice_returns_same_photo() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir);
        let config = test_config();
        let (ana, ben, _) = families(&db).await;

        let data = jpeg_bytes(8, 8);
        let first = UploadService::init_upload(&db, &config, &storage, &ana, init_request(&data, "image/jpeg"))
            .await
            .unwrap();
        let mut req = init_request(&data, "image/jpeg");
        req.sha256 = req.sha256.to_uppercase();
        let second = UploadService::init_upload(&db, &config, &storage, &ben, req).await.unwrap();

        assert_eq!(second, InitUploadResponse::duplicate(first.photo_id().to_string()));
        assert_eq!(photo_count(&db).await, 1);
    }

    #[tokio::test]
    async fn test_same_bytes_in_other_group_is_not_duplicate() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir);
        let config = test_config();
        let (ana, _, zoe) = families(&db).await;

        let data = jpeg_bytes(8, 8);
        let a = UploadService::init_upload(&db, &config, &storage, &ana, init_request(&data, "image/jpeg"))
            .await
            .unwrap();
        let z = UploadService::init_upload(&db, &config, &storage, &zoe, init_request(&data, "image/jpeg"))
            .await
            .unwrap();
        assert!(matches!(z, InitUploadResponse::Created { .. }));
        assert_ne!(a.photo_id(), z.photo_id());
    }

    #[tokio::test]
    async fn test_sequential_uploads_of_identical_bytes() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir);
        let config = test_config();
        let (ana, _, _) = families(&db).await;

        let data = png_bytes(40, 30);
        let (first, _) = upload(&db, &config, &storage, &ana, &data, "image/png").await;
        let again = UploadService::init_upload(&db, &config, &storage, &ana, init_request(&data, "image/png"))
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(&again).unwrap(),
            serde_json::json!({"duplicate": true, "photoId": first})
        );
    }

    #[tokio::test]
    async fn test_init_rejects_oversize_and_bad_mime() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir);
        let mut config = test_config();
        config.upload.max_size_bytes = 1024;
        let (ana, _, _) = families(&db).await;

        let mut big = init_request(b"x", "image/jpeg");
        big.size = 1025;
        let err = UploadService::init_upload(&db, &config, &storage, &ana, big).await.unwrap_err();
        assert!(matches!(&err, AppError::BadRequest(m) if m.starts_with("File too large")));

        let zip = init_request(b"x", "application/zip");
        let err = UploadService::init_upload(&db, &config, &storage, &ana, zip).await.unwrap_err();
        assert!(matches!(&err, AppError::BadRequest(m) if m == "Invalid MIME type"));

        let mut empty = init_request(b"x", "image/jpeg");
        empty.size = 0;
        assert!(UploadService::init_upload(&db, &config, &storage, &ana, empty).await.is_err());

        let mut bad_hash = init_request(b"x", "image/jpeg");
        bad_hash.sha256 = "abc".into();
        assert!(UploadService::init_upload(&db, &config, &storage, &ana, bad_hash).await.is_err());

        assert_eq!(photo_count(&db).await, 0);
    }

    #[tokio::test]
    async fn test_complete_builds_variants_and_metadata() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir);
        let config = test_config();
        let (ana, _, _) = families(&db).await;

        let data = png_bytes(900, 600);
        let (photo_id, done) = upload(&db, &config, &storage, &ana, &data, "image/png").await;
        assert!(done.success);
        assert_eq!(done.status, UploadState::Ready);

        let photo: Photo = sqlx::query_as("SELECT * FROM photos WHERE id = ?")
            .bind(&photo_id)
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!((photo.width, photo.height), (Some(900), Some(600)));
        assert_eq!(photo.taken_at_source.as_deref(), Some("fallback"));
        assert!(photo.taken_at.is_some());
        assert_eq!(photo.media_metadata(), Some(MediaMetadata::Other { format: "png".into() }));

        let variants = variants_of(&db, &photo_id).await;
        assert_eq!(variants.len(), 2);
        let large = &variants[0];
        let thumb = &variants[1];
        assert_eq!((large.variant.as_str(), large.width, large.height), ("large", 900, 600));
        assert_eq!((thumb.variant.as_str(), thumb.width, thumb.height), ("thumb", 320, 213));
        assert_eq!(thumb.storage_key, VariantKind::Thumb.storage_key(&ana.group_id, &photo_id));
        assert!(storage.exists(&thumb.storage_key).await.unwrap());
    }

    #[tokio::test]
    async fn test_variants_fit_bounds_and_keep_aspect() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir);
        let mut config = test_config();
        config.variants.thumb_max = 64;
        config.variants.large_max = 200;
        let (ana, _, _) = families(&db).await;

        for (w, h) in [(500, 300), (300, 500), (90, 40)] {
            let data = png_bytes(w, h);
            let (photo_id, _) = upload(&db, &config, &storage, &ana, &data, "image/png").await;
            for v in variants_of(&db, &photo_id).await {
                let bound = if v.variant == "thumb" { 64 } else { 200 };
                assert!(v.width <= bound && v.height <= bound);
                assert!(v.width <= w as i64 && v.height <= h as i64, "never upscaled");
                let original = w as f64 / h as f64;
                let scaled = v.width as f64 / v.height as f64;
                assert!((original - scaled).abs() <= original / v.height.min(v.width) as f64 + 1e-9);
            }
        }
    }

    #[tokio::test]
    async fn test_complete_twice_keeps_one_row_per_variant() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir);
        let config = test_config();
        let (ana, _, _) = families(&db).await;

        let data = jpeg_bytes(400, 400);
        let (photo_id, _) = upload(&db, &config, &storage, &ana, &data, "image/jpeg").await;
        let key = format!("orig/{}/{}.jpg", ana.group_id, photo_id);
        let again = UploadService::complete_upload(
            &db,
            &config,
            &storage,
            &ana,
            CompleteUploadRequest { photo_id: photo_id.clone(), key },
        )
        .await
        .unwrap();
        assert_eq!(again.status, UploadState::Ready);
        assert_eq!(variants_of(&db, &photo_id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_complete_without_object_is_not_found() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir);
        let config = test_config();
        let (ana, _, _) = families(&db).await;

        let data = jpeg_bytes(8, 8);
        let init = UploadService::init_upload(&db, &config, &storage, &ana, init_request(&data, "image/jpeg"))
            .await
            .unwrap();
        let InitUploadResponse::Created { photo_id, key, .. } = init else {
            panic!("expected created");
        };

        let err = UploadService::complete_upload(
            &db,
            &config,
            &storage,
            &ana,
            CompleteUploadRequest { photo_id: photo_id.clone(), key },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(status_of(&db, &photo_id).await, "uploading");
        assert!(variants_of(&db, &photo_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_complete_checks_group_and_key() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir);
        let config = test_config();
        let (ana, _, zoe) = families(&db).await;

        let data = jpeg_bytes(8, 8);
        let init = UploadService::init_upload(&db, &config, &storage, &ana, init_request(&data, "image/jpeg"))
            .await
            .unwrap();
        let InitUploadResponse::Created { photo_id, key, .. } = init else {
            panic!("expected created");
        };

        let err = UploadService::complete_upload(
            &db,
            &config,
            &storage,
            &zoe,
            CompleteUploadRequest { photo_id: photo_id.clone(), key: key.clone() },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = UploadService::complete_upload(
            &db,
            &config,
            &storage,
            &ana,
            CompleteUploadRequest { photo_id, key: "orig/other/thing.jpg".into() },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_variant_failure_is_swallowed() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = FlakyStorage {
            inner: test_storage(&dir),
            fail_prefix: "large/",
        };
        let config = test_config();
        let (ana, _, _) = families(&db).await;

        let data = png_bytes(50, 50);
        let (photo_id, done) = upload(&db, &config, &storage, &ana, &data, "image/png").await;
        assert!(done.success);
        assert_eq!(done.status, UploadState::VariantsPending);

        let variants = variants_of(&db, &photo_id).await;
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].variant, "thumb");
    }

    #[tokio::test]
    async fn test_undecodable_image_marks_error_and_allows_retry() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir);
        let config = test_config();
        let (ana, _, _) = families(&db).await;

        let junk = b"not really a jpeg".to_vec();
        let init = UploadService::init_upload(&db, &config, &storage, &ana, init_request(&junk, "image/jpeg"))
            .await
            .unwrap();
        let InitUploadResponse::Created { photo_id, key, .. } = init else {
            panic!("expected created");
        };
        storage.put(&key, Bytes::from(junk), "image/jpeg").await.unwrap();

        let req = || CompleteUploadRequest { photo_id: photo_id.clone(), key: key.clone() };
        let err = UploadService::complete_upload(&db, &config, &storage, &ana, req()).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert_eq!(status_of(&db, &photo_id).await, "error");

        // the client re-uploads real bytes to the same key and retries
        storage.put(&key, Bytes::from(jpeg_bytes(16, 16)), "image/jpeg").await.unwrap();
        let done = UploadService::complete_upload(&db, &config, &storage, &ana, req()).await.unwrap();
        assert_eq!(done.status, UploadState::Ready);
    }

    #[tokio::test]
    async fn test_video_skips_variants() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir);
        let config = test_config();
        let (ana, _, _) = families(&db).await;

        let clip = b"\x00\x00\x00\x18ftypmp42 fake video".to_vec();
        let (photo_id, done) = upload(&db, &config, &storage, &ana, &clip, "video/mp4").await;
        assert_eq!(done.status, UploadState::Ready);
        assert!(variants_of(&db, &photo_id).await.is_empty());

        let photo: Photo = sqlx::query_as("SELECT * FROM photos WHERE id = ?")
            .bind(&photo_id)
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(photo.storage_key, format!("orig/{}/{}.mp4", ana.group_id, photo_id));
        assert_eq!(
            photo.media_metadata(),
            Some(MediaMetadata::Video { mime_type: "video/mp4".into() })
        );
    }

    /// Init and PUT the bytes, leaving the photo `uploading`
    async fn reserve(
        db: &Database,
        config: &Config,
        storage: &dyn StorageProvider,
        session: &CurrentUser,
        data: &[u8],
        mime: &str,
    ) -> CompleteUploadRequest {
        let init = UploadService::init_upload(db, config, storage, session, init_request(data, mime))
            .await
            .unwrap();
        let InitUploadResponse::Created { photo_id, key, .. } = init else {
            panic!("expected a new upload, got {:?}", init);
        };
        storage.put(&key, Bytes::copy_from_slice(data), mime).await.unwrap();
        CompleteUploadRequest { photo_id, key }
    }

    fn spawn_complete(
        db: &Database,
        config: &Config,
        storage: &Arc<GatedStorage>,
        session: &CurrentUser,
        req: &CompleteUploadRequest,
    ) -> tokio::task::JoinHandle<Result<CompleteUploadResponse>> {
        let (db, config, storage, session) = (db.clone(), config.clone(), storage.clone(), session.clone());
        let req = CompleteUploadRequest { photo_id: req.photo_id.clone(), key: req.key.clone() };
        tokio::spawn(async move { UploadService::complete_upload(&db, &config, storage.as_ref(), &session, req).await })
    }

    #[tokio::test]
    async fn test_overlapping_completions_both_succeed() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(GatedStorage::new(test_storage(&dir)));
        let config = test_config();
        let (ana, _, _) = families(&db).await;

        let data = png_bytes(40, 30);
        let req = reserve(&db, &config, storage.as_ref(), &ana, &data, "image/png").await;

        // first completion pauses while writing its thumbnail
        storage.puts.arm();
        let first = spawn_complete(&db, &config, &storage, &ana, &req);
        storage.puts.entered.notified().await;
        assert_eq!(status_of(&db, &req.photo_id).await, "variants_pending");

        // the retry re-enters and pauses reading the original
        storage.gets.arm();
        let retry = spawn_complete(&db, &config, &storage, &ana, &req);
        storage.gets.entered.notified().await;
        assert_eq!(status_of(&db, &req.photo_id).await, "awaiting_completion");

        storage.puts.open();
        let done = first.await.unwrap().unwrap();
        assert!(done.success);
        assert_eq!(done.status, UploadState::AwaitingCompletion);
        assert_eq!(status_of(&db, &req.photo_id).await, "awaiting_completion");

        storage.gets.open();
        let done = retry.await.unwrap().unwrap();
        assert!(done.success);
        assert_eq!(done.status, UploadState::Ready);
        assert_eq!(status_of(&db, &req.photo_id).await, "ready");
        assert_eq!(variants_of(&db, &req.photo_id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_interrupted_completion_can_be_retried() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(GatedStorage::new(test_storage(&dir)));
        let config = test_config();
        let (ana, _, _) = families(&db).await;

        let data = jpeg_bytes(32, 32);
        let req = reserve(&db, &config, storage.as_ref(), &ana, &data, "image/jpeg").await;

        storage.gets.arm();
        let first = spawn_complete(&db, &config, &storage, &ana, &req);
        storage.gets.entered.notified().await;
        first.abort();
        assert!(first.await.unwrap_err().is_cancelled());
        assert_eq!(status_of(&db, &req.photo_id).await, "awaiting_completion");

        let done = UploadService::complete_upload(&db, &config, storage.as_ref(), &ana, req).await.unwrap();
        assert_eq!(done.status, UploadState::Ready);
        assert_eq!(variants_of(&db, &done.photo_id).await.len(), 2);
    }

    #[tokio::test]
    async fn test_retry_keeps_fallback_capture_time() {
        let db = test_db().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir);
        let config = test_config();
        let (ana, _, _) = families(&db).await;

        let data = png_bytes(20, 20);
        let (photo_id, _) = upload(&db, &config, &storage, &ana, &data, "image/png").await;
        let taken_at = |db: Database, id: String| async move {
            let row: (Option<String>, Option<String>) =
                sqlx::query_as("SELECT taken_at, taken_at_source FROM photos WHERE id = ?")
                    .bind(&id)
                    .fetch_one(db.pool())
                    .await
                    .unwrap();
            row
        };
        let before = taken_at(db.clone(), photo_id.clone()).await;
        assert_eq!(before.1.as_deref(), Some("fallback"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let key = format!("orig/{}/{}.png", ana.group_id, photo_id);
        UploadService::complete_upload(
            &db,
            &config,
            &storage,
            &ana,
            CompleteUploadRequest { photo_id: photo_id.clone(), key },
        )
        .await
        .unwrap();
        assert_eq!(taken_at(db.clone(), photo_id).await, before);
    }

    #[test]
    fn test_extension_for() {
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("image/webp"), "webp");
        assert_eq!(extension_for("video/mp4"), "mp4");
        assert_eq!(extension_for("weird"), "bin");
    }
}
