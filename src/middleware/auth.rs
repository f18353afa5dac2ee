use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use crate::error::AppError;
use crate::services::AuthService;
use crate::AppState;

/// Authentication middleware
/// Resolves the Bearer token into a `CurrentUser` request extension
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Missing or invalid Authorization header".to_string()))?;

    let current_user = AuthService::authenticate(&state.db, &state.config, token).await?;
    request.extensions_mut().insert(current_user);

    Ok(next.run(request).await)
}
