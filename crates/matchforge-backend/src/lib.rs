//! Session backend abstraction for Matchforge.
//!
//! A matchmaking backend exposes a handle-based, callback-driven session
//! API. This crate describes that API as the [`SessionBackend`] trait so
//! the orchestrator and the event pump can be written once and run
//! against any implementation.
//!
//! # Completion model
//!
//! Some operations are synchronous and fallible: they return a
//! [`BackendError`] immediately. The asynchronous ones (`commit_session`,
//! `start_session`, `destroy_session`) only report whether the request was
//! *accepted*. Their [`Callback`] fires later, and only from inside
//! [`SessionBackend::pump_events`]. If nobody pumps, nothing completes.
//!
//! # Feature Flags
//!
//! - `memory` (default): [`MemoryBackend`], an in-process backend that
//!   honours the same contract and supports fault injection

mod error;
#[cfg(feature = "memory")]
mod memory;
mod types;

pub use error::BackendError;
#[cfg(feature = "memory")]
pub use memory::{HandleCounters, MemoryBackend, MemoryHandle, RemoteSession};
pub use types::{BackendCredentials, Operation, ResultCode};

/// Completion callback for an asynchronous backend operation.
///
/// Invoked at most once, on whichever task is running
/// [`SessionBackend::pump_events`]. Implementations must not hold their own
/// locks while invoking it.
pub type Callback = Box<dyn FnOnce(ResultCode) + Send + 'static>;

/// The session-lifecycle surface of a matchmaking backend.
pub trait SessionBackend: Send + Sync + 'static {
    /// Opaque, single-use session modification handle.
    ///
    /// Owned by the caller from `begin_session_modification` until it is
    /// either passed to `release_handle` or consumed by `commit_session`.
    type Handle: Send + 'static;

    /// Requests a modification handle for a new session.
    fn begin_session_modification(
        &self,
        name: &str,
        bucket_id: &str,
        max_players: u32,
    ) -> Result<Self::Handle, BackendError>;

    /// Sets the bucket id the backend groups the session under.
    fn set_bucket_id(
        &self,
        handle: &mut Self::Handle,
        bucket_id: &str,
    ) -> Result<(), BackendError>;

    /// Releases a handle that will not be committed.
    fn release_handle(&self, handle: Self::Handle);

    /// Submits the handle for commit. The handle is consumed even when the
    /// call is rejected; the backend releases it in that case.
    fn commit_session(
        &self,
        handle: Self::Handle,
        on_complete: Callback,
    ) -> Result<(), BackendError>;

    /// Asks the backend to start (mark in-progress) the named session.
    fn start_session(
        &self,
        name: &str,
        on_complete: Callback,
    ) -> Result<(), BackendError>;

    /// Asks the backend to destroy the named session.
    fn destroy_session(
        &self,
        name: &str,
        on_complete: Callback,
    ) -> Result<(), BackendError>;

    /// Processes pending backend events, firing any completions that are
    /// ready. Returns how many callbacks fired.
    ///
    /// Must be called regularly from a single execution context, never
    /// re-entrantly.
    fn pump_events(&self) -> Result<usize, BackendError>;
}
