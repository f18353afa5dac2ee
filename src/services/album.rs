use std::collections::HashSet;
use uuid::Uuid;

use crate::db::{self, Database};
use crate::error::{AppError, Result};
use crate::models::{
    Album, AlbumListResponse, CreateAlbumRequest, CurrentUser, PageQuery, Photo,
    PhotoListResponse, UpdateAlbumRequest, UploadState,
};
use crate::services::photo::GALLERY_ORDER;
use crate::services::PhotoService;

const MAX_TITLE_CHARS: usize = 200;
const MAX_DESCRIPTION_CHARS: usize = 2000;

const ALBUM_SELECT: &str = r#"
    SELECT a.*,
           (SELECT COUNT(*) FROM album_photos ap
              JOIN photos p ON p.id = ap.photo_id
             WHERE ap.album_id = a.id AND p.status IN ('variants_pending', 'ready')) AS photo_count
    FROM albums a
"#;

/// Album service
pub struct AlbumService;

impl AlbumService {
    pub async fn create_album(db: &Database, session: &CurrentUser, req: CreateAlbumRequest) -> Result<Album> {
        let title = validate_title(&req.title)?;
        let description = normalize_description(req.description.as_deref())?;
        let id = Uuid::new_v4().to_string();
        let now = db::now_timestamp();

        sqlx::query(
            r#"
            INSERT INTO albums (id, group_id, created_by, title, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&session.group_id)
        .bind(&session.id)
        .bind(&title)
        .bind(&description)
        .bind(&now)
        .bind(&now)
        .execute(db.pool())
        .await?;

        tracing::info!("Album {} created by {}", id, session.username);
        Self::get_album(db, session, &id).await
    }

    /// Albums of the caller's group, most recently changed first
    pub async fn list_albums(db: &Database, session: &CurrentUser) -> Result<AlbumListResponse> {
        let sql = format!("{} WHERE a.group_id = ? ORDER BY a.updated_at DESC, a.rowid DESC", ALBUM_SELECT);
        let albums: Vec<Album> = sqlx::query_as(&sql)
            .bind(&session.group_id)
            .fetch_all(db.pool())
            .await?;
        Ok(AlbumListResponse { albums })
    }

    pub async fn get_album(db: &Database, session: &CurrentUser, album_id: &str) -> Result<Album> {
        let sql = format!("{} WHERE a.id = ? AND a.group_id = ?", ALBUM_SELECT);
        sqlx::query_as(&sql)
            .bind(album_id)
            .bind(&session.group_id)
            .fetch_optional(db.pool())
            .await?
            .ok_or_else(|| AppError::NotFound("Album not found".to_string()))
    }

    /// Apply the fields present in `req`. An empty `cover_photo_id` clears the cover.
    pub async fn update_album(
        db: &Database,
        session: &CurrentUser,
        album_id: &str,
        req: UpdateAlbumRequest,
    ) -> Result<Album> {
        let album = Self::get_album(db, session, album_id).await?;

        let title = match req.title.as_deref() {
            Some(t) => validate_title(t)?,
            None => album.title,
        };
        let description = match req.description.as_deref() {
            Some(d) => normalize_description(Some(d))?,
            None => album.description,
        };
        let cover_photo_id = match req.cover_photo_id.as_deref().map(str::trim) {
            Some("") => None,
            Some(photo_id) => {
                if !Self::contains(db, &album.id, photo_id).await? {
                    return Err(AppError::BadRequest(
                        "Cover photo must be in the album".to_string(),
                    ));
                }
                Some(photo_id.to_string())
            }
            None => album.cover_photo_id,
        };

        sqlx::query("UPDATE albums SET title = ?, description = ?, cover_photo_id = ?, updated_at = ? WHERE id = ?")
            .bind(&title)
            .bind(&description)
            .bind(&cover_photo_id)
            .bind(db::now_timestamp())
            .bind(&album.id)
            .execute(db.pool())
            .await?;

        Self::get_album(db, session, &album.id).await
    }

    /// Delete an album. Its photos are untouched.
    pub async fn delete_album(db: &Database, session: &CurrentUser, album_id: &str) -> Result<()> {
        let album = Self::get_album(db, session, album_id).await?;
        if album.created_by != session.id && !session.is_admin() {
            return Err(AppError::Forbidden(
                "Only the album creator or an admin can delete this album".to_string(),
            ));
        }

        sqlx::query("DELETE FROM albums WHERE id = ?")
            .bind(&album.id)
            .execute(db.pool())
            .await?;

        tracing::info!("Album {} deleted by {}", album.id, session.username);
        Ok(())
    }

    /// Add group photos to an album. Photos already present are skipped; the
    /// first photo added becomes the cover when none is set.
    pub async fn add_photos(
        db: &Database,
        session: &CurrentUser,
        album_id: &str,
        photo_ids: Vec<String>,
    ) -> Result<Album> {
        let album = Self::get_album(db, session, album_id).await?;

        let mut seen = HashSet::new();
        let photo_ids: Vec<String> = photo_ids
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect();
        if photo_ids.is_empty() {
            return Err(AppError::BadRequest("No photos given".to_string()));
        }

        for photo_id in &photo_ids {
            PhotoService::find_in_group(db, &session.group_id, photo_id).await?;
        }

        let now = db::now_timestamp();
        let mut tx = db.pool().begin().await?;
        for photo_id in &photo_ids {
            sqlx::query("INSERT OR IGNORE INTO album_photos (album_id, photo_id, added_at) VALUES (?, ?, ?)")
                .bind(&album.id)
                .bind(photo_id)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query("UPDATE albums SET cover_photo_id = COALESCE(cover_photo_id, ?), updated_at = ? WHERE id = ?")
            .bind(&photo_ids[0])
            .bind(&now)
            .bind(&album.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::debug!("Added {} photos to album {}", photo_ids.len(), album.id);
        Self::get_album(db, session, &album.id).await
    }

    pub async fn remove_photo(
        db: &Database,
        session: &CurrentUser,
        album_id: &str,
        photo_id: &str,
    ) -> Result<Album> {
        let album = Self::get_album(db, session, album_id).await?;

        let removed = sqlx::query("DELETE FROM album_photos WHERE album_id = ? AND photo_id = ?")
            .bind(&album.id)
            .bind(photo_id)
            .execute(db.pool())
            .await?;
        if removed.rows_affected() == 0 {
            return Err(AppError::NotFound("Photo is not in this album".to_string()));
        }

        sqlx::query(
            r#"
            UPDATE albums
            SET cover_photo_id = CASE WHEN cover_photo_id = ? THEN NULL ELSE cover_photo_id END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(photo_id)
        .bind(db::now_timestamp())
        .bind(&album.id)
        .execute(db.pool())
        .await?;

        Self::get_album(db, session, &album.id).await
    }

    /// Completed photos in an album, in gallery order
    pub async fn list_album_photos(
        db: &Database,
        session: &CurrentUser,
        album_id: &str,
        page: &PageQuery,
    ) -> Result<PhotoListResponse> {
        let album = Self::get_album(db, session, album_id).await?;
        let (limit, offset) = (page.limit(), page.offset());

        let sql = format!(
            r#"
            SELECT p.* FROM photos p
            JOIN album_photos ap ON ap.photo_id = p.id
            WHERE ap.album_id = ? AND p.status IN (?, ?)
            ORDER BY {}
            LIMIT ? OFFSET ?
            "#,
            GALLERY_ORDER
        );
        let photos: Vec<Photo> = sqlx::query_as(&sql)
            .bind(&album.id)
            .bind(UploadState::VariantsPending.as_str())
            .bind(UploadState::Ready.as_str())
            .bind(limit)
            .bind(offset)
            .fetch_all(db.pool())
            .await?;

        Ok(PhotoListResponse {
            photos: PhotoService::responses(db, photos).await?,
            limit,
            offset,
        })
    }

    async fn contains(db: &Database, album_id: &str, photo_id: &str) -> Result<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT photo_id FROM album_photos WHERE album_id = ? AND photo_id = ?")
            .bind(album_id)
            .bind(photo_id)
            .fetch_optional(db.pool())
            .await?;
        Ok(row.is_some())
    }
}

fn validate_title(raw: &str) -> Result<String> {
    let title = raw.trim();
    if title.is_empty() || title.chars().count() > MAX_TITLE_CHARS {
        return Err(AppError::BadRequest(format!(
            "Album title must be 1 to {} characters",
            MAX_TITLE_CHARS
        )));
    }
    Ok(title.to_string())
}

fn normalize_description(raw: Option<&str>) -> Result<Option<String>> {
    let Some(description) = raw.map(str::trim).filter(|d| !d.is_empty()) else {
        return Ok(None);
    };
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(AppError::BadRequest(format!(
            "Description exceeds {} characters",
            MAX_DESCRIPTION_CHARS
        )));
    }
    Ok(Some(description.to_string()))
}
