use axum::extract::{Request, State};
use axum::http::header::RETRY_AFTER;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::http::{ApiKey, AppError};
use crate::AppState;

/// Global upload budget. Runs after authentication so rejected callers do not
/// consume the window.
pub async fn upload_rate_limit_middleware(
    State(state): State<AppState>,
    _key: ApiKey,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let info = state.rate_limiter.acquire();
    if info.limited {
        let retry_after = info.retry_after.as_secs_f64().ceil().max(1.0) as u64;
        tracing::warn!(limit = info.limit, retry_after, "upload rate limit exceeded");
        let mut response =
            AppError::rate_limited("Too many uploads. Please try again later.").into_response();
        let headers = response.headers_mut();
        headers.insert("x-ratelimit-limit", HeaderValue::from(info.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(0u32));
        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
        return Ok(response);
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(info.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(info.remaining));
    Ok(response)
}
