//! API error type and its HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::api::types::ApiErrorResponse;
use crate::error::Error;

/// Errors returned by API handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 404: unknown bakeform.
    #[error("{0}")]
    NotFound(String),

    /// 403: an image with that name already exists.
    #[error("{0}")]
    Conflict(String),

    /// 400: malformed request.
    #[error("{0}")]
    BadRequest(String),

    /// 500: everything else.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Wrap any error as an internal error.
    pub fn internal(e: impl std::fmt::Display) -> Self {
        ApiError::Internal(e.to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        match e {
            Error::NotFound(_) => ApiError::NotFound(e.to_string()),
            Error::Conflict(_) => ApiError::Conflict(e.to_string()),
            Error::InvalidName(_) => ApiError::BadRequest(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("blocking task failed: {}", e))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "request rejected");
        }

        let body = ApiErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        let cases = [
            (Error::NotFound("a".into()), StatusCode::NOT_FOUND),
            (Error::Conflict("a".into()), StatusCode::FORBIDDEN),
            (Error::InvalidName("..".into()), StatusCode::BAD_REQUEST),
            (Error::AlreadyMounted("a".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (Error::copy("a", "disk full"), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            let text = err.to_string();
            let api = ApiError::from(err);
            assert_eq!(api.status_code(), status, "{}", text);
            assert_eq!(api.to_string(), text);
        }
    }
}
