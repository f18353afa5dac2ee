use axum::{extract::State, Extension, Json};

use crate::error::Result;
use crate::extract::ApiJson;
use crate::models::{
    CompleteUploadRequest, CompleteUploadResponse, CurrentUser, InitUploadRequest, InitUploadResponse,
};
use crate::services::UploadService;
use crate::AppState;

/// Reserve a photo and get a presigned PUT URL for the original
/// POST /api/v1/uploads/init
pub async fn init_upload(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    ApiJson(req): ApiJson<InitUploadRequest>,
) -> Result<Json<InitUploadResponse>> {
    let response = UploadService::init_upload(
        &state.db,
        &state.config,
        state.storage.provider.as_ref(),
        &current_user,
        req,
    )
    .await?;
    Ok(Json(response))
}

/// Confirm the original was uploaded and build its variants
/// POST /api/v1/uploads/complete
pub async fn complete_upload(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
    ApiJson(req): ApiJson<CompleteUploadRequest>,
) -> Result<Json<CompleteUploadResponse>> {
    let response = UploadService::complete_upload(
        &state.db,
        &state.config,
        state.storage.provider.as_ref(),
        &current_user,
        req,
    )
    .await?;
    Ok(Json(response))
}
