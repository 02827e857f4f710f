//! Mapping from sync errors to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Error body returned by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError(pub SyncError);

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            SyncError::NotFound(_) => StatusCode::NOT_FOUND,
            SyncError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            SyncError::Validation { .. } | SyncError::IncompleteConfig { .. } => {
                StatusCode::BAD_REQUEST
            }
            SyncError::BuildTimeout(_) | SyncError::CacheUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            SyncError::Store(_) | SyncError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), status = status.as_u16(), error = %self.0, "Request failed");
        } else {
            tracing::debug!(code = self.0.code(), status = status.as_u16(), error = %self.0, "Request rejected");
        }
        let body = ErrorBody {
            error: self.0.code().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeId;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError(SyncError::NotFound(NodeId::new())).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError(SyncError::Unauthorized("x".into())).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError(SyncError::validation("stats", "bad")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(SyncError::BuildTimeout(10)).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError(SyncError::CacheUnavailable("down".into())).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError(SyncError::Store("io".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_response_carries_code() {
        let response = ApiError(SyncError::Unauthorized("revoked".into())).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
