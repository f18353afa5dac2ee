use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde_json::{json, Value};

use crate::error::Result;
use crate::extract::ApiJson;
use crate::models::{
    CurrentUser, PageQuery, PhotoListResponse, PhotoResponse, PhotoUrlQuery, PhotoUrlResponse,
    Rendition, UpdatePhotoRequest,
};
use crate::services::PhotoService;
use crate::AppState;

/// Gallery listing
/// GET /api/v1/photos?limit=&offset=
pub async fn list_photos(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Query(page): Query<PageQuery>,
) -> Result<Json<PhotoListResponse>> {
    let list = PhotoService::list_photos(&state.db, &current_user, &page).await?;
    Ok(Json(list))
}

/// GET /api/v1/photos/:id
pub async fn get_photo(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<PhotoResponse>> {
    let photo = PhotoService::get_photo(&state.db, &current_user, &id).await?;
    Ok(Json(photo))
}

/// Set or clear the caption
/// PATCH /api/v1/photos/:id
pub async fn update_photo(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdatePhotoRequest>,
) -> Result<Json<PhotoResponse>> {
    let photo = PhotoService::update_caption(&state.db, &current_user, &id, req.caption.as_deref()).await?;
    Ok(Json(photo))
}

/// DELETE /api/v1/photos/:id
pub async fn delete_photo(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<Value>> {
    PhotoService::delete_photo(&state.db, state.storage.provider.as_ref(), &current_user, &id).await?;
    Ok(Json(json!({ "success": true })))
}

/// Short-lived download URL for a rendition
/// GET /api/v1/photos/:id/url?variant=thumb|large|orig
pub async fn photo_url(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Query(query): Query<PhotoUrlQuery>,
) -> Result<Json<PhotoUrlResponse>> {
    let rendition = Rendition::parse(query.variant.as_deref())?;
    let url = PhotoService::photo_url(
        &state.db,
        &state.config,
        state.storage.provider.as_ref(),
        &current_user,
        &id,
        rendition,
    )
    .await?;
    Ok(Json(url))
}
