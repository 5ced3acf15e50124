//! Session types: the orchestrator's record of one match session.
//!
//! A record tracks:
//! - WHICH session it is (`name`, plus the `SessionInstance` that tells two
//!   sessions created under the same name apart)
//! - WHAT the backend was asked to build (`bucket_id`, `max_players`)
//! - WHERE it is in its lifecycle (`SessionState`) and since WHEN
//! - the last result code the backend reported for it

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use matchforge_backend::{BackendError, ResultCode};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// OrchestratorConfig
// ---------------------------------------------------------------------------

/// Timeouts applied by [`Orchestrator::sweep_stale`].
///
/// The backend has no way to cancel an operation, so a completion that
/// never arrives would leave its record stuck forever. The sweep is what
/// gives up on them.
///
/// [`Orchestrator::sweep_stale`]: crate::Orchestrator::sweep_stale
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long a record may wait in `PendingCommit` before it is marked
    /// `Failed(TimedOut)`.
    ///
    /// Default: 30 seconds.
    pub commit_timeout: Duration,

    /// How long a record may wait in `PendingDestroy` before it is dropped
    /// from the registry without a confirmation.
    ///
    /// Default: 30 seconds.
    pub destroy_timeout: Duration,

    /// How long a `Failed` record stays visible for diagnostics.
    ///
    /// Default: 5 minutes.
    pub failed_retention: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            commit_timeout: Duration::from_secs(30),
            destroy_timeout: Duration::from_secs(30),
            failed_retention: Duration::from_secs(300),
        }
    }
}

// ---------------------------------------------------------------------------
// SessionInstance
// ---------------------------------------------------------------------------

/// Global counter for instance numbers. Starts at 1.
static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Process-unique number assigned to each create attempt.
///
/// Names are reused (the same two players can be matched twice), so the
/// name alone cannot tell whether a completion belongs to the record that
/// is currently registered. Every callback carries the instance it was
/// issued for; a mismatch means the completion is stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionInstance(u64);

impl SessionInstance {
    /// Allocates the next instance number.
    pub fn next() -> Self {
        Self(NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Why a session ended up `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The backend reported this code, synchronously or in a completion.
    Backend(ResultCode),
    /// A synchronous call failed without a result code, e.g. the backend
    /// was not initialized.
    Unavailable,
    /// The sweep gave up waiting for a completion.
    TimedOut,
}

impl From<&BackendError> for FailureReason {
    fn from(err: &BackendError) -> Self {
        match err.code() {
            Some(code) => Self::Backend(code),
            None => Self::Unavailable,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(code) => write!(f, "{code}"),
            Self::Unavailable => f.write_str("Unavailable"),
            Self::TimedOut => f.write_str("TimedOut"),
        }
    }
}

/// Lifecycle state of a session instance.
///
/// ```text
///   Created ──→ Configuring ──→ PendingCommit ──→ Active ──→ PendingDestroy ──→ Destroyed
///      │             │                │              │              │
///      └─────────────┴────────────────┴──────────────┴──────────────┴──→ Failed
/// ```
///
/// Transitions only move forward. `Failed` can be entered from any state
/// that is not terminal; `Destroyed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// A create intent arrived and a modification handle is being requested.
    Created,
    /// The handle exists and its parameters are being set.
    Configuring,
    /// The commit was submitted; waiting for its completion.
    PendingCommit,
    /// The backend confirmed the commit.
    Active,
    /// A destroy was submitted; waiting for its completion.
    PendingDestroy,
    /// The backend confirmed the destroy.
    Destroyed,
    /// The session will not make further progress.
    Failed(FailureReason),
}

impl SessionState {
    /// Position along the happy path. `Failed` sorts after everything.
    fn rank(&self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Configuring => 1,
            Self::PendingCommit => 2,
            Self::Active => 3,
            Self::PendingDestroy => 4,
            Self::Destroyed => 5,
            Self::Failed(_) => 6,
        }
    }

    /// Returns `true` for `Destroyed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Destroyed | Self::Failed(_))
    }

    /// Whether a record in this state may move to `next`.
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Short machine-readable name, as reported over HTTP.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Configuring => "configuring",
            Self::PendingCommit => "pending_commit",
            Self::Active => "active",
            Self::PendingDestroy => "pending_destroy",
            Self::Destroyed => "destroyed",
            Self::Failed(_) => "failed",
        }
    }

    /// The failure reason, for `Failed` states.
    pub fn failure(&self) -> Option<FailureReason> {
        match self {
            Self::Failed(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed({reason})"),
            other => f.write_str(other.name()),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// The orchestrator's record of a single match session.
///
/// Records are created by `create_session`, live in the registry from the
/// moment the commit is submitted, and are removed once the backend
/// confirms the destroy or the sweep gives up on them. Reads hand out
/// clones, so a `Session` held by a caller is a snapshot.
#[derive(Debug, Clone)]
pub struct Session {
    /// Caller-chosen identifier, unique among live sessions.
    pub name: String,

    /// Backend grouping tag the session was committed under.
    pub bucket_id: String,

    /// Capacity of the session.
    pub max_players: u32,

    /// Which create attempt this record belongs to.
    pub instance: SessionInstance,

    /// Current lifecycle state.
    pub state: SessionState,

    /// Most recent code the backend reported for this instance.
    ///
    /// Cleared when a commit succeeds, so a record that reached `Active`
    /// after an `OutOfSync` warning does not keep showing it.
    pub last_result: Option<ResultCode>,

    /// Whether a start call for this instance completed successfully.
    pub started: bool,

    /// When the record entered its current state.
    state_since: Instant,
}

impl Session {
    /// Creates a record in the `Created` state.
    pub fn new(
        name: impl Into<String>,
        bucket_id: impl Into<String>,
        max_players: u32,
        instance: SessionInstance,
    ) -> Self {
        Self {
            name: name.into(),
            bucket_id: bucket_id.into(),
            max_players,
            instance,
            state: SessionState::Created,
            last_result: None,
            started: false,
            state_since: Instant::now(),
        }
    }

    /// Moves the record to `next` if the state machine allows it.
    ///
    /// Returns `false`, leaving the record untouched, for backward moves
    /// and for any move out of a terminal state.
    pub fn transition(&mut self, next: SessionState) -> bool {
        if !self.state.can_transition_to(&next) {
            return false;
        }
        self.state = next;
        self.state_since = Instant::now();
        true
    }

    /// How long the record has been in its current state.
    pub fn time_in_state(&self) -> Duration {
        self.state_since.elapsed()
    }
}
