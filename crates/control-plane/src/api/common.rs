// Common DTOs for public API
//
// These types are shared across multiple API endpoints.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use autopilot_core::{EngineError, StoreError};

/// Standard error response for API endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Error message describing what went wrong.
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }

    /// Convert to axum response tuple
    pub fn into_response(self, status: StatusCode) -> (StatusCode, Json<Self>) {
        (status, Json(self))
    }
}

/// Response wrapper for list endpoints.
/// All list endpoints return responses wrapped in a `data` field.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListResponse<T> {
    /// Array of items returned by the list operation.
    pub data: Vec<T>,
}

impl<T> ListResponse<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self { data }
    }
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(data: Vec<T>) -> Self {
        Self { data }
    }
}

/// Engine error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub EngineError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            EngineError::NotFound(_)
            | EngineError::Store(StoreError::RunNotFound(_))
            | EngineError::Store(StoreError::JobNotFound(_)) => StatusCode::NOT_FOUND,
            EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Store(_) | EngineError::Template(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, status = %status, "request rejected");
        }
        ErrorResponse::new(self.0.to_string())
            .into_response(status)
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopilot_core::QueueError;
    use uuid::Uuid;

    #[test]
    fn test_engine_error_status_mapping() {
        let cases = [
            (EngineError::run_not_found(Uuid::nil()), StatusCode::NOT_FOUND),
            (
                EngineError::Store(StoreError::JobNotFound(Uuid::nil())),
                StatusCode::NOT_FOUND,
            ),
            (EngineError::forbidden("admin only"), StatusCode::FORBIDDEN),
            (EngineError::conflict("lost race"), StatusCode::CONFLICT),
            (
                EngineError::Queue(QueueError::Unavailable("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                EngineError::Store(StoreError::Database("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }
}
