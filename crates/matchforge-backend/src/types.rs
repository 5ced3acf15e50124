//! Value types shared by every backend implementation.

use std::fmt;

// ---------------------------------------------------------------------------
// ResultCode
// ---------------------------------------------------------------------------

/// The outcome a backend reports for an operation.
///
/// Completion callbacks receive one of these, and synchronous rejections
/// carry one inside [`BackendError::Rejected`](crate::BackendError::Rejected).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultCode {
    /// The operation completed.
    Success,
    /// The named session does not exist on the backend.
    NotFound,
    /// The local view of the session is stale. The backend retries on its
    /// own the next time it reaches its service.
    OutOfSync,
    /// The backend rejected one of the request parameters.
    InvalidParameters,
    /// Any other failure, identified by the backend's raw code.
    Other(i32),
}

impl ResultCode {
    /// Raw code reported when a commit targets a session name that is
    /// already taken on the backend.
    pub const ALREADY_EXISTS: ResultCode = ResultCode::Other(9002);

    /// Returns `true` for [`ResultCode::Success`].
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::NotFound => write!(f, "NotFound"),
            Self::OutOfSync => write!(f, "OutOfSync"),
            Self::InvalidParameters => write!(f, "InvalidParameters"),
            Self::Other(code) => write!(f, "Other({code})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// Names the backend session operations, for errors, logs and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    BeginModification,
    SetBucketId,
    Commit,
    Start,
    Destroy,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BeginModification => "begin_session_modification",
            Self::SetBucketId => "set_bucket_id",
            Self::Commit => "commit_session",
            Self::Start => "start_session",
            Self::Destroy => "destroy_session",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// Product and client credentials needed to bring a backend up.
///
/// `Debug` redacts the client secret so the struct is safe to log.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendCredentials {
    pub product_id: String,
    pub sandbox_id: String,
    pub deployment_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl BackendCredentials {
    /// Returns the name of the first empty field, if any.
    pub fn first_missing(&self) -> Option<&'static str> {
        [
            ("product_id", &self.product_id),
            ("sandbox_id", &self.sandbox_id),
            ("deployment_id", &self.deployment_id),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
    }
}

impl fmt::Debug for BackendCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendCredentials")
            .field("product_id", &self.product_id)
            .field("sandbox_id", &self.sandbox_id)
            .field("deployment_id", &self.deployment_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}
