use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn_with_state;
use axum::{routing::delete, routing::get, routing::post, Router};

use crate::http::handlers;
use crate::http::middleware::rate_limit::upload_rate_limit_middleware;
use crate::AppState;

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn upload(state: &AppState) -> Router<AppState> {
    let body_limit = state
        .upload_max_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES)
        .min(usize::MAX as u64) as usize;

    Router::new()
        .route("/upload", post(handlers::upload))
        .route_layer(from_fn_with_state(
            state.clone(),
            upload_rate_limit_middleware,
        ))
        .layer(DefaultBodyLimit::max(body_limit))
}

pub fn library() -> Router<AppState> {
    Router::new()
        .route("/list", get(handlers::list_files))
        .route("/stats", get(handlers::stats))
        .route("/metadata", post(handlers::file_metadata))
}

pub fn files() -> Router<AppState> {
    Router::new()
        .route("/files/:type/:filename", get(handlers::serve_file))
        .route("/files/:type/:filename", delete(handlers::delete_file))
}
