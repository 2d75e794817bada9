use axum::{
    extract::{multipart::MultipartError, Multipart, Path, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::app::media::{FileListing, MetadataResponse, StorageStats, Upload, UploadResponse};
use crate::domain::media::{MediaKind, StorageArea};
use crate::http::{ApiKey, AppError};
use crate::infra::storage::sanitize_filename;
use crate::AppState;

const IMMUTABLE_CACHE: &str = "public, max-age=31536000, immutable";

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Accepts a multipart form whose `file` field carries the upload. Auth and
/// the upload budget are enforced by the route's middleware.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let original_filename = field.file_name().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        upload = Some(Upload {
            original_filename,
            bytes,
        });
        break;
    }

    let upload = upload.ok_or_else(|| AppError::bad_request("no file uploaded"))?;
    if upload.bytes.len() as u64 > state.upload_max_bytes {
        return Err(AppError::payload_too_large(format!(
            "file exceeds the {} byte limit",
            state.upload_max_bytes
        )));
    }

    let original_filename = upload.original_filename.clone();
    let service = state.media_service();
    let response = service.ingest(upload).await.map_err(|err| {
        let app_error = AppError::from(err);
        if app_error.status().is_server_error() {
            tracing::error!(code = app_error.code(), filename = ?original_filename, "upload failed");
        } else {
            tracing::info!(code = app_error.code(), filename = ?original_filename, "upload rejected");
        }
        app_error
    })?;

    Ok(Json(response))
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::payload_too_large("upload exceeds the configured size limit")
    } else {
        AppError::bad_request(format!("malformed multipart body: {}", err.body_text()))
    }
}

pub async fn list_files(
    _key: ApiKey,
    State(state): State<AppState>,
) -> Result<Json<FileListing>, AppError> {
    let listing = state.media_service().list().await.map_err(|err| {
        tracing::error!(error = ?err, "failed to list files");
        AppError::internal("failed to list files")
    })?;
    Ok(Json(listing))
}

pub async fn stats(
    _key: ApiKey,
    State(state): State<AppState>,
) -> Result<Json<StorageStats>, AppError> {
    let stats = state
        .media_service()
        .stats(state.upload_max_bytes)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, "failed to collect storage stats");
            AppError::internal("failed to collect storage stats")
        })?;
    Ok(Json(stats))
}

#[derive(Deserialize)]
pub struct MetadataRequest {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: String,
}

pub async fn file_metadata(
    _key: ApiKey,
    State(state): State<AppState>,
    Json(payload): Json<MetadataRequest>,
) -> Result<Json<MetadataResponse>, AppError> {
    let kind = MediaKind::from_param(&payload.kind)
        .ok_or_else(|| AppError::bad_request("type must be image or video"))?;

    let metadata = state
        .media_service()
        .metadata_for_url(&payload.url, kind)
        .await
        .map_err(|err| {
            tracing::warn!(error = %err, url = %payload.url, "failed to derive metadata");
            AppError::from(err)
        })?;

    match metadata {
        Some(metadata) => Ok(Json(metadata)),
        None => Err(AppError::not_found("file not found")),
    }
}

#[derive(Serialize)]
pub struct DeleteResponse {
    success: bool,
    deleted: String,
}

pub async fn delete_file(
    _key: ApiKey,
    State(state): State<AppState>,
    Path((kind, filename)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>, AppError> {
    let kind = MediaKind::from_param(&kind)
        .ok_or_else(|| AppError::bad_request("type must be image or video"))?;
    let filename = sanitize_filename(&filename)
        .ok_or_else(|| AppError::bad_request("invalid filename"))?;

    let deleted = state
        .media_service()
        .delete(kind, filename)
        .await
        .map_err(|err| {
            tracing::error!(error = ?err, filename = %filename, "failed to delete file");
            AppError::internal("failed to delete file")
        })?;

    if deleted {
        Ok(Json(DeleteResponse {
            success: true,
            deleted: filename.to_string(),
        }))
    } else {
        Err(AppError::not_found("file not found"))
    }
}

/// Stored names are content-derived identifiers, so a hit can be cached forever.
pub async fn serve_file(
    State(state): State<AppState>,
    Path((area, filename)): Path<(String, String)>,
    request: Request,
) -> Result<Response, AppError> {
    let area = StorageArea::from_param(&area).ok_or_else(|| AppError::not_found("file not found"))?;
    let path = state
        .storage
        .resolve(area, &filename)
        .ok_or_else(|| AppError::not_found("file not found"))?;
    if !state.storage.exists(area, &filename).await {
        return Err(AppError::not_found("file not found"));
    }

    let response = match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    let mut response = response.into_response();
    if response.status().is_success() {
        response
            .headers_mut()
            .insert(header::CACHE_CONTROL, HeaderValue::from_static(IMMUTABLE_CACHE));
    }
    Ok(response)
}
