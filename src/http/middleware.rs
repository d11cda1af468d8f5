//! Rate limit middleware.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, error};

use crate::ratelimit::{RateLimitResult, RateLimiter};

const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Identify the caller: first `X-Forwarded-For` hop, else the peer IP.
pub fn extract_key(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').map(str::trim).find(|hop| !hop.is_empty()));

    if let Some(hop) = forwarded {
        return hop.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn apply_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(result.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(result.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(result.reset_at_unix()));

    if !result.allowed {
        headers.insert(RETRY_AFTER, HeaderValue::from(result.retry_after_secs()));
    }
}

/// Admit or reject a request based on the limiter's decision.
///
/// Limiter failures become `500` responses; they never fall through to
/// the inner service and never masquerade as a `429`.
pub async fn rate_limit(
    State(limiter): State<Arc<dyn RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let key = extract_key(&request);

    let result = match limiter.allow(&key).await {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, key = %key, "Rate limiter error");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "internal server error" })),
            )
                .into_response();
        }
    };

    if !result.allowed {
        debug!(
            key = %key,
            algorithm = %limiter.algorithm(),
            retry_after_secs = result.retry_after_secs(),
            "Request rejected"
        );
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "too many requests",
                "limit": result.limit,
                "reset_at": result.reset_at.to_rfc3339(),
                "retry_after_secs": result.retry_after_secs(),
            })),
        )
            .into_response();
        apply_headers(response.headers_mut(), &result);
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &result);
    response
}
