use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::services::ServiceError;

/// Wire error envelope: `{"code", "error", "details": {"message"}}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub error: &'static str,
    pub details: ErrorDetails,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetails {
    pub message: String,
}

/// Transport-edge error. Service errors map here exactly once; nothing
/// re-wraps along the way.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, &'static str, String) {
        match &self.0 {
            ServiceError::NotFound => (
                StatusCode::NOT_FOUND,
                "not_found",
                "Not Found",
                "The requested resource does not exist".to_string(),
            ),
            ServiceError::Forbidden(msg) => {
                (StatusCode::FORBIDDEN, "forbidden", "Forbidden", msg.clone())
            }
            ServiceError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "validation_error",
                "Validation Error",
                msg.clone(),
            ),
            ServiceError::Conflict(msg) => {
                (StatusCode::CONFLICT, "conflict", "Conflict", msg.clone())
            }
            ServiceError::FileTooLarge { max } => (
                StatusCode::PAYLOAD_TOO_LARGE,
                "file_too_large",
                "File Too Large",
                format!("Attachment exceeds the maximum size of {max} bytes"),
            ),
            ServiceError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "Unauthenticated",
                "A valid bearer token is required".to_string(),
            ),
            ServiceError::Unimplemented(msg) => (
                StatusCode::NOT_IMPLEMENTED,
                "unimplemented",
                "Not Implemented",
                msg.clone(),
            ),
            ServiceError::Storage(msg) => {
                tracing::error!(error = %msg, "Storage error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "storage_error",
                    "Storage Error",
                    "A storage backend error occurred".to_string(),
                )
            }
            ServiceError::Database(err) => {
                tracing::error!(error = %err, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal Error",
                    "An internal database error occurred".to_string(),
                )
            }
            ServiceError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal Error",
                    "An internal error occurred".to_string(),
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, error, message) = self.parts();
        (
            status,
            Json(ErrorBody {
                code,
                error,
                details: ErrorDetails { message },
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_taxonomy() {
        let cases = [
            (ServiceError::NotFound, StatusCode::NOT_FOUND, "not_found"),
            (
                ServiceError::Forbidden("no".into()),
                StatusCode::FORBIDDEN,
                "forbidden",
            ),
            (
                ServiceError::Validation("bad".into()),
                StatusCode::BAD_REQUEST,
                "validation_error",
            ),
            (
                ServiceError::Conflict("race".into()),
                StatusCode::CONFLICT,
                "conflict",
            ),
            (
                ServiceError::FileTooLarge { max: 100 },
                StatusCode::PAYLOAD_TOO_LARGE,
                "file_too_large",
            ),
            (
                ServiceError::Unauthenticated,
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
            ),
            (
                ServiceError::Unimplemented("off".into()),
                StatusCode::NOT_IMPLEMENTED,
                "unimplemented",
            ),
        ];

        for (err, status, code) in cases {
            let (actual_status, actual_code, _, _) = ApiError(err).parts();
            assert_eq!(actual_status, status);
            assert_eq!(actual_code, code);
        }
    }

    #[test]
    fn internal_errors_hide_details() {
        let (_, _, _, message) =
            ApiError(ServiceError::Internal("secret stack".into())).parts();
        assert!(!message.contains("secret"));
    }
}
