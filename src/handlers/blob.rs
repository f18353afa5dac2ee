use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::io::ReaderStream;

use crate::error::{AppError, Result};
use crate::models::BlobQuery;
use crate::storage::LocalStorage;
use crate::AppState;

fn local_store(state: &AppState) -> Result<Arc<LocalStorage>> {
    state
        .storage
        .local
        .clone()
        .ok_or_else(|| AppError::NotFound("Blob routes are not enabled".to_string()))
}

/// Direct upload target of a local presigned PUT URL
/// PUT /api/v1/blob/*key?expires=&signature=
pub async fn put_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<BlobQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode> {
    let store = local_store(&state)?;
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    store.verify(
        "PUT",
        &key,
        query.expires,
        &query.signature,
        Some(content_type),
        Utc::now().timestamp(),
    )?;

    let written = store
        .put_stream(&key, body.into_data_stream(), state.config.upload.max_size_bytes)
        .await?;
    tracing::info!("Received blob {} ({} bytes)", key, written);

    Ok(StatusCode::OK)
}

/// Download target of a local presigned GET URL
/// GET /api/v1/blob/*key?expires=&signature=
pub async fn get_blob(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<BlobQuery>,
) -> Result<Response> {
    let store = local_store(&state)?;
    store.verify(
        "GET",
        &key,
        query.expires,
        &query.signature,
        None,
        Utc::now().timestamp(),
    )?;

    let (file, len) = store.open(&key).await?;
    let content_type = mime_guess::from_path(&key).first_or_octet_stream();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(header::CONTENT_LENGTH, len)
        .header(header::CACHE_CONTROL, "private, max-age=300")
        .body(Body::from_stream(ReaderStream::new(file)))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}
