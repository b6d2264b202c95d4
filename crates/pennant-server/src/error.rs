//! API error type and HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use pennant_core::{EvaluationError, FlagKey, ValidationError};
use pennant_storage::StorageError;

/// Errors surfaced by the evaluation API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No flag exists under the requested key.
    #[error("flag not found: {0}")]
    FlagNotFound(FlagKey),

    /// The request is malformed.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The flag could not be reduced to a variant.
    #[error("evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),

    /// A storage or cache operation failed; surfaced verbatim so the caller
    /// can decide on a retry policy.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::FlagNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(err) if err.is_not_found() => StatusCode::NOT_FOUND,
            ApiError::Evaluation(_) | ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = ApiError::FlagNotFound(FlagKey::new("ghost"));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = ApiError::Validation(ValidationError::EmptyUserId);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err = ApiError::Storage(StorageError::not_found("Evaluation", "id", "x"));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = ApiError::Storage(StorageError::Configuration("boom".to_string()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
