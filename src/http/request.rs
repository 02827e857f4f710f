//! Request identity and credential extraction.
//!
//! # Responsibilities
//! - Stamp every request with an `x-request-id` (UUID v4) unless the caller sent one
//! - Echo the id on the response and carry it on the request span
//! - Pull the bearer credential out of `Authorization`
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - A missing or malformed credential is rejected before the body is read

use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::http::{header::AUTHORIZATION, request::Parts, HeaderMap, Request};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::Span;

use crate::error::SyncError;
use crate::http::error::ApiError;
use crate::sync::parse_bearer;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Assigns a fresh UUID to requests that arrive without an id.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::x_request_id(MakeRequestUuid)
}

/// Copies the request id onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}

pub trait RequestIdExt {
    fn request_id(&self) -> Option<&str>;
}

impl RequestIdExt for HeaderMap {
    fn request_id(&self) -> Option<&str> {
        self.get(X_REQUEST_ID).and_then(|v| v.to_str().ok())
    }
}

/// Span for `TraceLayer`, tagged with the request id.
pub fn request_span(request: &Request<Body>) -> Span {
    tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = request.headers().request_id().unwrap_or("unknown"),
    )
}

/// The `Authorization: Bearer <token>` credential.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer)
            .map(|token| BearerToken(token.to_string()))
            .ok_or_else(|| ApiError(SyncError::Unauthorized("missing bearer credential".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_request_id_lookup() {
        let mut headers = HeaderMap::new();
        assert_eq!(headers.request_id(), None);
        headers.insert(X_REQUEST_ID, HeaderValue::from_static("abc-123"));
        assert_eq!(headers.request_id(), Some("abc-123"));
    }

    #[tokio::test]
    async fn test_bearer_extraction() {
        let request = Request::builder()
            .header(AUTHORIZATION, "Bearer node-secret")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();
        let BearerToken(token) = BearerToken::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(token, "node-secret");
    }

    #[tokio::test]
    async fn test_missing_bearer_is_unauthorized() {
        let request = Request::builder().body(()).unwrap();
        let (mut parts, _) = request.into_parts();
        let err = BearerToken::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert!(matches!(err.0, SyncError::Unauthorized(_)));
    }
}
