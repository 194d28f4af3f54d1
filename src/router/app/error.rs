use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::{
    ai::ollama::UpstreamError,
    credential::HashingError,
    data::error::StoreError,
    session::{AuthError, SessionError},
};

/// Every failure a handler can report. Responses carry a short message only;
/// the underlying error is logged.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("malformed JSON: {0}")]
    Encoding(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Hashing(#[from] HashingError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("template error: {0}")]
    Template(#[from] tera::Error),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Encoding(rejection.body_text())
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Auth(err) => AppError::Auth(err),
            SessionError::Store(err) => AppError::Store(err),
        }
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl AppError {
    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            AppError::Validation(message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::Encoding(message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::Auth(AuthError::NoToken) => {
                (StatusCode::UNAUTHORIZED, "Not logged in".to_string())
            }
            AppError::Auth(AuthError::NotFound) => (
                StatusCode::UNAUTHORIZED,
                "Session expired or invalid".to_string(),
            ),
            AppError::Auth(AuthError::Forbidden) => {
                (StatusCode::FORBIDDEN, "Not allowed".to_string())
            }
            AppError::Store(StoreError::NotFound) => {
                (StatusCode::NOT_FOUND, "Not found".to_string())
            }
            AppError::Store(StoreError::Constraint(_)) => (
                StatusCode::CONFLICT,
                "Conflicts with an existing record".to_string(),
            ),
            AppError::Upstream(_) => (
                StatusCode::BAD_GATEWAY,
                "Inference service unavailable".to_string(),
            ),
            AppError::Store(_) | AppError::Hashing(_) | AppError::Template(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }

        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_details_do_not_leak() {
        let err = AppError::Store(StoreError::Constraint(
            "UNIQUE constraint failed: users.name".to_string(),
        ));
        let (status, message) = err.status_and_message();

        assert_eq!(status, StatusCode::CONFLICT);
        assert!(!message.contains("users.name"));
    }

    #[test]
    fn test_forbidden_is_distinct_from_not_found() {
        assert_eq!(
            AppError::from(AuthError::Forbidden).status_and_message().0,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::from(StoreError::NotFound).status_and_message().0,
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_session_errors_keep_their_status() {
        let err = AppError::from(SessionError::Auth(AuthError::NoToken));
        assert_eq!(err.status_and_message().0, StatusCode::UNAUTHORIZED);

        let err = AppError::from(SessionError::Store(StoreError::Corrupt("bad row".to_string())));
        let (status, message) = err.status_and_message();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!message.contains("bad row"));
    }

    #[test]
    fn test_upstream_failure_is_bad_gateway() {
        let err = AppError::from(UpstreamError::Status(500));
        assert_eq!(err.status_and_message().0, StatusCode::BAD_GATEWAY);
    }
}
