use axum::{extract::State, Extension, Json};
use serde_json::{json, Value};

use crate::error::Result;
use crate::extract::ApiJson;
use crate::models::{CurrentUser, LoginRequest, LoginResponse, ProfileResponse, RegisterRequest, UserResponse};
use crate::services::AuthService;
use crate::AppState;

/// Register a new user, founding a family or joining one by invite code
/// POST /api/v1/auth/register
pub async fn register(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<Json<UserResponse>> {
    let user = AuthService::register(&state.db, req).await?;
    Ok(Json(user))
}

/// Login user
/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let response = AuthService::login(&state.db, &state.config, req).await?;
    Ok(Json(response))
}

/// Revoke every token issued to the caller
/// POST /api/v1/auth/logout
pub async fn logout(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<Value>> {
    AuthService::logout(&state.db, &current_user.id).await?;
    Ok(Json(json!({ "success": true })))
}

/// GET /api/v1/me
pub async fn me(
    State(state): State<AppState>,
    Extension(current_user): Extension<CurrentUser>,
) -> Result<Json<ProfileResponse>> {
    let profile = AuthService::profile(&state.db, &current_user).await?;
    Ok(Json(profile))
}
