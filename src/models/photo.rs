use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{AppError, Result};
use crate::media::MediaMetadata;
use crate::models::UploadState;

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;
pub const MAX_CAPTION_CHARS: usize = 2000;

/// Photo model
#[derive(Debug, Clone, FromRow)]
pub struct Photo {
    pub id: String,
    pub group_id: String,
    pub owner_user_id: String,
    pub original_filename: String,
    pub storage_key: String,
    pub content_hash: String,
    pub bytes: i64,
    pub mime_type: String,
    pub status: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub metadata: Option<String>,
    pub taken_at: Option<String>,
    pub taken_at_source: Option<String>,
    pub caption: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Photo {
    pub fn state(&self) -> Result<UploadState> {
        UploadState::from_str(&self.status)
            .ok_or_else(|| AppError::Internal(format!("Unknown photo status: {}", self.status)))
    }

    pub fn is_video(&self) -> bool {
        self.mime_type.starts_with("video/")
    }

    /// Parsed metadata. Rows whose JSON no longer parses surface as `Other`.
    pub fn media_metadata(&self) -> Option<MediaMetadata> {
        let raw = self.metadata.as_deref()?;
        match serde_json::from_str(raw) {
            Ok(meta) => Some(meta),
            Err(e) => {
                tracing::warn!("Photo {} has unreadable metadata: {}", self.id, e);
                Some(MediaMetadata::Other {
                    format: self.mime_type.clone(),
                })
            }
        }
    }
}

/// Stored display variant of a photo
#[derive(Debug, Clone, FromRow)]
pub struct PhotoVariant {
    pub photo_id: String,
    pub variant: String,
    pub storage_key: String,
    pub width: i64,
    pub height: i64,
    pub bytes: i64,
    pub created_at: String,
}

/// Derived display variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantKind {
    Thumb,
    Large,
}

impl VariantKind {
    pub const ALL: [VariantKind; 2] = [VariantKind::Thumb, VariantKind::Large];

    pub fn as_str(&self) -> &'static str {
        match self {
            VariantKind::Thumb => "thumb",
            VariantKind::Large => "large",
        }
    }

    pub fn storage_key(&self, group_id: &str, photo_id: &str) -> String {
        format!("{}/{}/{}.jpg", self.as_str(), group_id, photo_id)
    }
}

/// What a client can ask a URL for: a derived variant or the original
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rendition {
    Orig,
    Thumb,
    Large,
}

impl Rendition {
    pub fn parse(s: Option<&str>) -> Result<Self> {
        match s.map(str::trim) {
            None | Some("") | Some("large") => Ok(Rendition::Large),
            Some("thumb") => Ok(Rendition::Thumb),
            Some("orig") => Ok(Rendition::Orig),
            Some(other) => Err(AppError::BadRequest(format!("Unknown variant: {}", other))),
        }
    }

    pub fn variant(&self) -> Option<VariantKind> {
        match self {
            Rendition::Orig => None,
            Rendition::Thumb => Some(VariantKind::Thumb),
            Rendition::Large => Some(VariantKind::Large),
        }
    }
}

impl From<VariantKind> for Rendition {
    fn from(kind: VariantKind) -> Self {
        match kind {
            VariantKind::Thumb => Rendition::Thumb,
            VariantKind::Large => Rendition::Large,
        }
    }
}

/// Photo as returned to clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoResponse {
    pub id: String,
    pub owner_user_id: String,
    pub original_filename: String,
    pub mime_type: String,
    pub bytes: i64,
    pub status: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub taken_at: Option<String>,
    pub taken_at_source: Option<String>,
    pub caption: Option<String>,
    pub metadata: Option<MediaMetadata>,
    pub variants: Vec<String>,
    pub created_at: String,
}

impl PhotoResponse {
    pub fn new(photo: Photo, variants: Vec<String>) -> Self {
        let metadata = photo.media_metadata();
        Self {
            id: photo.id,
            owner_user_id: photo.owner_user_id,
            original_filename: photo.original_filename,
            mime_type: photo.mime_type,
            bytes: photo.bytes,
            status: photo.status,
            width: photo.width,
            height: photo.height,
            taken_at: photo.taken_at,
            taken_at_source: photo.taken_at_source,
            caption: photo.caption,
            metadata,
            variants,
            created_at: photo.created_at,
        }
    }
}

/// Paging parameters shared by the gallery and album listings
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageQuery {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

#[derive(Debug, Serialize)]
pub struct PhotoListResponse {
    pub photos: Vec<PhotoResponse>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Deserialize)]
pub struct PhotoUrlQuery {
    pub variant: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoUrlResponse {
    pub url: String,
    pub variant: Rendition,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePhotoRequest {
    pub caption: Option<String>,
}

/// Trimmed caption, `None` when blank
pub fn normalize_caption(caption: Option<&str>) -> Result<Option<String>> {
    let Some(caption) = caption.map(str::trim).filter(|c| !c.is_empty()) else {
        return Ok(None);
    };
    if caption.chars().count() > MAX_CAPTION_CHARS {
        return Err(AppError::BadRequest(format!(
            "Caption exceeds {} characters",
            MAX_CAPTION_CHARS
        )));
    }
    Ok(Some(caption.to_string()))
}
