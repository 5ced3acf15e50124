//! Error types for the Matchforge service.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use matchforge_backend::BackendError;
use matchforge_session::SessionError;

use crate::config::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impl, so
/// `?` converts sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum MatchforgeError {
    /// The backend could not be brought up.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A session intent was rejected.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The environment is missing or misconfigured.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Binding or serving the HTTP listener failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors returned by HTTP handlers, rendered as `{"error": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Malformed or incomplete request body.
    #[error("{0}")]
    BadRequest(String),

    #[error("session '{0}' not found")]
    NotFound(String),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Session(SessionError::InvalidRequest(_)) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Session(SessionError::Backend { .. }) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use matchforge_backend::{Operation, ResultCode};

    use super::*;

    #[test]
    fn test_from_backend_error() {
        let err: MatchforgeError = BackendError::NotInitialized.into();
        assert!(matches!(err, MatchforgeError::Backend(_)));
        assert_eq!(err.to_string(), "backend not initialized");
    }

    #[test]
    fn test_from_config_error() {
        let err: MatchforgeError = ConfigError::Missing("SERVER_PORT").into();
        assert!(matches!(err, MatchforgeError::Config(_)));
        assert!(err.to_string().contains("SERVER_PORT"));
    }

    #[test]
    fn test_from_io_error() {
        let err: MatchforgeError =
            std::io::Error::new(std::io::ErrorKind::AddrInUse, "taken").into();
        assert!(matches!(err, MatchforgeError::Io(_)));
    }

    #[test]
    fn test_api_error_status_mapping() {
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotFound("m".into()).status(), StatusCode::NOT_FOUND);

        let invalid = SessionError::InvalidRequest("empty".into());
        assert_eq!(ApiError::from(invalid).status(), StatusCode::BAD_REQUEST);

        let rejected = SessionError::Backend {
            name: "m".into(),
            operation: Operation::Commit,
            source: BackendError::rejected(Operation::Commit, ResultCode::Other(1)),
        };
        assert_eq!(
            ApiError::from(rejected).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
