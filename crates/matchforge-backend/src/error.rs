use crate::{Operation, ResultCode};

/// Errors returned synchronously by a session backend.
///
/// Asynchronous outcomes never show up here; they arrive later as a
/// [`ResultCode`] passed to the operation's completion callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The backend platform or its sessions interface is not available.
    #[error("backend not initialized")]
    NotInitialized,

    /// Initialization was attempted with missing or unusable credentials.
    #[error("invalid backend credentials: {0}")]
    InvalidCredentials(String),

    /// The backend refused the call before queuing any work.
    #[error("{operation} rejected by backend: {code}")]
    Rejected {
        operation: Operation,
        code: ResultCode,
    },

    /// `pump_events` was invoked while another pump was still running.
    #[error("pump_events called while a pump was already in progress")]
    PumpReentered,
}

impl BackendError {
    /// Shorthand for a [`BackendError::Rejected`].
    pub fn rejected(operation: Operation, code: ResultCode) -> Self {
        Self::Rejected { operation, code }
    }

    /// The result code carried by the error, when there is one.
    pub fn code(&self) -> Option<ResultCode> {
        match self {
            Self::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}
