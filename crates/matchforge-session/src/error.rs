//! Error types for the session layer.

use matchforge_backend::{BackendError, Operation};

/// Errors returned by the orchestrator's intents.
///
/// Only synchronous failures show up here. Once the backend has accepted
/// a request, its outcome is recorded on the session and reported through
/// the [`Completion`](crate::Completion), never as a `SessionError`.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The request was rejected before any backend call was made.
    #[error("invalid session request: {0}")]
    InvalidRequest(String),

    /// The backend refused the call.
    /// Any modification handle involved has already been released.
    #[error("{operation} failed for session '{name}': {source}")]
    Backend {
        name: String,
        operation: Operation,
        #[source]
        source: BackendError,
    },
}

impl SessionError {
    pub(crate) fn backend(
        name: &str,
        operation: Operation,
        source: BackendError,
    ) -> Self {
        Self::Backend {
            name: name.to_owned(),
            operation,
            source,
        }
    }

    /// The underlying backend error, if there is one.
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            Self::Backend { source, .. } => Some(source),
            Self::InvalidRequest(_) => None,
        }
    }
}
