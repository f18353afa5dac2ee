use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Album row joined with its derived photo count
#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: String,
    #[serde(skip_serializing)]
    pub group_id: String,
    pub created_by: String,
    pub title: String,
    pub description: Option<String>,
    pub cover_photo_id: Option<String>,
    pub photo_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateAlbumRequest {
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAlbumRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub cover_photo_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPhotosRequest {
    pub photo_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AlbumListResponse {
    pub albums: Vec<Album>,
}
