use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde_json::{json, Value};

use crate::error::Result;
use crate::extract::ApiJson;
use crate::models::{
    AddPhotosRequest, Album, AlbumListResponse, CreateAlbumRequest, CurrentUser, PageQuery,
    PhotoListResponse, UpdateAlbumRequest,
};
use crate::services::AlbumService;
use crate::AppState;

/// GET /api/v1/albums
pub async fn list_albums(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<AlbumListResponse>> {
    let albums = AlbumService::list_albums(&state.db, &current_user).await?;
    Ok(Json(albums))
}

/// POST /api/v1/albums
pub async fn create_album(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    ApiJson(req): ApiJson<CreateAlbumRequest>,
) -> Result<Json<Album>> {
    let album = AlbumService::create_album(&state.db, &current_user, req).await?;
    Ok(Json(album))
}

/// GET /api/v1/albums/:id
pub async fn get_album(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<Album>> {
    let album = AlbumService::get_album(&state.db, &current_user, &id).await?;
    Ok(Json(album))
}

/// PATCH /api/v1/albums/:id
pub async fn update_album(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateAlbumRequest>,
) -> Result<Json<Album>> {
    let album = AlbumService::update_album(&state.db, &current_user, &id, req).await?;
    Ok(Json(album))
}

/// DELETE /api/v1/albums/:id
pub async fn delete_album(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    AlbumService::delete_album(&state.db, &current_user, &id).await?;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/v1/albums/:id/photos
pub async fn list_album_photos(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<PhotoListResponse>> {
    let photos = AlbumService::list_album_photos(&state.db, &current_user, &id, &page).await?;
    Ok(Json(photos))
}

/// POST /api/v1/albums/:id/photos
pub async fn add_photos(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<AddPhotosRequest>,
) -> Result<Json<Album>> {
    let album = AlbumService::add_photos(&state.db, &current_user, &id, req.photo_ids).await?;
    Ok(Json(album))
}

/// DELETE /api/v1/albums/:id/photos/:photo_id
pub async fn remove_photo(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path((id, photo_id)): Path<(String, String)>,
) -> Result<Json<Album>> {
    let album = AlbumService::remove_photo(&state.db, &current_user, &id, &photo_id).await?;
    Ok(Json(album))
}
