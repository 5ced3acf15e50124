//! The session lifecycle orchestrator.
//!
//! Turns create / start / destroy intents into backend calls and records
//! what the backend later reports. Intents never wait for their outcome:
//! they return once the backend has accepted the request, and the
//! completion callback, run by the event pump, updates the registry.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use matchforge_backend::{Callback, Operation, SessionBackend};
use tracing::{debug, info, warn};

use crate::completion::{self, Accepted};
use crate::registry::{SessionRegistry, SweepReport};
use crate::{
    FailureReason, OrchestratorConfig, Session, SessionError, SessionInstance,
    SessionState,
};

type SharedRegistry = Arc<Mutex<SessionRegistry>>;

/// Locks the registry. A panic inside a critical section cannot leave a
/// record half-written, so poisoning is ignored.
fn lock(registry: &SharedRegistry) -> MutexGuard<'_, SessionRegistry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// HandleGuard
// ---------------------------------------------------------------------------

/// Owns a modification handle until it is committed.
///
/// If the guard is dropped while still holding the handle (an early
/// return, a `?`, a panic) the handle goes back to the backend. Taking the
/// handle out for the commit disarms it, so each handle is released or
/// consumed exactly once.
struct HandleGuard<'a, B: SessionBackend> {
    backend: &'a B,
    handle: Option<B::Handle>,
}

impl<'a, B: SessionBackend> HandleGuard<'a, B> {
    fn new(backend: &'a B, handle: B::Handle) -> Self {
        Self {
            backend,
            handle: Some(handle),
        }
    }

    fn handle_mut(&mut self) -> &mut B::Handle {
        self.handle
            .as_mut()
            .expect("handle is present until consumed")
    }

    fn into_inner(mut self) -> B::Handle {
        self.handle
            .take()
            .expect("handle is present until consumed")
    }
}

impl<B: SessionBackend> Drop for HandleGuard<'_, B> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.backend.release_handle(handle);
        }
    }
}

/// Best-effort destroy of a remote session whose record already failed,
/// e.g. a commit confirmed after the sweep timed it out. The record itself
/// stays `Failed` until it is purged.
fn destroy_orphan<B: SessionBackend>(backend: &B, name: &str) {
    let session = name.to_owned();
    let on_complete: Callback = Box::new(move |code| {
        if code.is_success() {
            info!(session = %session, "orphaned remote session destroyed");
        } else {
            warn!(
                session = %session,
                operation = %Operation::Destroy,
                %code,
                "orphaned remote session not destroyed"
            );
        }
    });
    if let Err(source) = backend.destroy_session(name, on_complete) {
        warn!(
            session = name,
            operation = %Operation::Destroy,
            error = %source,
            "orphaned remote session could not be destroyed"
        );
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives session lifecycles against a [`SessionBackend`].
///
/// Shared between request handlers behind an `Arc`. Every method is
/// synchronous and returns quickly; the registry lock is only held for a
/// single update and never while the backend is being called.
pub struct Orchestrator<B: SessionBackend> {
    backend: Arc<B>,
    registry: SharedRegistry,
    config: OrchestratorConfig,
}

impl<B: SessionBackend> Orchestrator<B> {
    pub fn new(backend: Arc<B>, config: OrchestratorConfig) -> Self {
        Self {
            backend,
            registry: Arc::new(Mutex::new(SessionRegistry::new())),
            config,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Creates a session and submits it for commit.
    ///
    /// Returns the session name as soon as the commit is accepted. The
    /// record is registered as `PendingCommit` and becomes `Active` (or
    /// `Failed`) when the pump delivers the commit completion.
    ///
    /// # Errors
    /// - [`SessionError::InvalidRequest`]: empty name or zero capacity;
    ///   nothing was sent to the backend.
    /// - [`SessionError::Backend`]: a backend call was rejected. Any handle
    ///   acquired on the way has been released and nothing was registered.
    pub fn create_session(
        &self,
        name: &str,
        bucket_id: &str,
        max_players: u32,
    ) -> Result<Accepted<String>, SessionError> {
        if name.trim().is_empty() {
            return Err(SessionError::InvalidRequest(
                "session name must not be empty".into(),
            ));
        }
        if max_players == 0 {
            return Err(SessionError::InvalidRequest(
                "max_players must be at least 1".into(),
            ));
        }

        let instance = SessionInstance::next();
        let mut session = Session::new(name, bucket_id, max_players, instance);

        let handle = self
            .backend
            .begin_session_modification(name, bucket_id, max_players)
            .map_err(|source| {
                warn!(
                    session = name,
                    operation = %Operation::BeginModification,
                    error = %source,
                    "session creation rejected"
                );
                SessionError::backend(name, Operation::BeginModification, source)
            })?;
        let mut guard = HandleGuard::new(&*self.backend, handle);
        session.transition(SessionState::Configuring);

        if let Err(source) = self.backend.set_bucket_id(guard.handle_mut(), bucket_id) {
            session.transition(SessionState::Failed(FailureReason::from(&source)));
            warn!(
                session = name,
                %instance,
                operation = %Operation::SetBucketId,
                error = %source,
                state = %session.state,
                "bucket id rejected, releasing handle"
            );
            return Err(SessionError::backend(name, Operation::SetBucketId, source));
        }

        // Registered before the commit goes out, so the completion always
        // finds its record.
        session.transition(SessionState::PendingCommit);
        if let Some(previous) = lock(&self.registry).insert(session) {
            warn!(
                session = name,
                %instance,
                replaced = %previous.instance,
                previous_state = %previous.state,
                "session name reused, replacing previous record"
            );
        }

        let (completer, completion) = completion::channel();
        let registry = Arc::clone(&self.registry);
        let backend = Arc::clone(&self.backend);
        let callback_name = name.to_owned();
        let on_complete: Callback = Box::new(move |code| {
            let orphaned = {
                let mut registry = lock(&registry);
                registry.apply_commit_result(&callback_name, instance, code)
                    && code.is_success()
                    && registry
                        .get(&callback_name)
                        .is_some_and(|s| s.state.failure().is_some())
            };
            if orphaned {
                destroy_orphan(&*backend, &callback_name);
            }
            completer.complete(code);
        });

        if let Err(source) = self.backend.commit_session(guard.into_inner(), on_complete) {
            lock(&self.registry).remove_instance(name, instance);
            warn!(
                session = name,
                %instance,
                operation = %Operation::Commit,
                error = %source,
                "commit rejected"
            );
            return Err(SessionError::backend(name, Operation::Commit, source));
        }

        info!(session = name, %instance, bucket_id, max_players, "session commit submitted");
        Ok(Accepted {
            value: name.to_owned(),
            completion,
        })
    }

    /// Asks the backend to start the named session.
    ///
    /// The call is issued even if no record exists; the backend decides
    /// whether the start is legal and may answer `NotFound` later.
    ///
    /// # Errors
    /// [`SessionError::Backend`] if the backend refuses the call outright.
    pub fn start_session(&self, name: &str) -> Result<Accepted<()>, SessionError> {
        let instance = lock(&self.registry).instance_of(name);

        let (completer, completion) = completion::channel();
        let registry = Arc::clone(&self.registry);
        let callback_name = name.to_owned();
        let on_complete: Callback = Box::new(move |code| {
            match instance {
                Some(instance) => {
                    lock(&registry).apply_start_result(&callback_name, instance, code);
                }
                None if code.is_success() => info!(
                    session = %callback_name,
                    operation = %Operation::Start,
                    %code,
                    "start completed for untracked session"
                ),
                None => warn!(
                    session = %callback_name,
                    operation = %Operation::Start,
                    %code,
                    "start failed for untracked session"
                ),
            }
            completer.complete(code);
        });

        self.backend.start_session(name, on_complete).map_err(|source| {
            warn!(
                session = name,
                operation = %Operation::Start,
                error = %source,
                "start rejected"
            );
            SessionError::backend(name, Operation::Start, source)
        })?;

        debug!(session = name, tracked = instance.is_some(), "session start submitted");
        Ok(Accepted {
            value: (),
            completion,
        })
    }

    /// Asks the backend to destroy the named session.
    ///
    /// A tracked, non-terminal record moves to `PendingDestroy` and is
    /// removed once the backend confirms. Unknown names are accepted too:
    /// the call still goes out and its completion is only logged.
    ///
    /// # Errors
    /// [`SessionError::Backend`] if the backend refuses the call outright.
    pub fn destroy_session(&self, name: &str) -> Result<Accepted<()>, SessionError> {
        let instance = lock(&self.registry).instance_of(name);

        let (completer, completion) = completion::channel();
        let registry = Arc::clone(&self.registry);
        let callback_name = name.to_owned();
        let on_complete: Callback = Box::new(move |code| {
            match instance {
                Some(instance) => {
                    lock(&registry).apply_destroy_result(&callback_name, instance, code);
                }
                None => debug!(
                    session = %callback_name,
                    operation = %Operation::Destroy,
                    %code,
                    "destroy completed for untracked session"
                ),
            }
            completer.complete(code);
        });

        self.backend.destroy_session(name, on_complete).map_err(|source| {
            warn!(
                session = name,
                operation = %Operation::Destroy,
                error = %source,
                "destroy rejected"
            );
            SessionError::backend(name, Operation::Destroy, source)
        })?;

        // The completion may already have removed the record; then this
        // is a no-op.
        if let Some(instance) = instance {
            lock(&self.registry).mark_pending_destroy(name, instance);
        }

        info!(session = name, tracked = instance.is_some(), "session destroy submitted");
        Ok(Accepted {
            value: (),
            completion,
        })
    }

    /// A snapshot of the named session, if it is tracked.
    pub fn session(&self, name: &str) -> Option<Session> {
        lock(&self.registry).get(name).cloned()
    }

    /// Snapshots of every tracked session, sorted by name.
    pub fn sessions(&self) -> Vec<Session> {
        lock(&self.registry).records()
    }

    /// Applies the timeout policy from [`OrchestratorConfig`].
    pub fn sweep_stale(&self) -> SweepReport {
        let report = lock(&self.registry).sweep(&self.config);
        if !report.is_empty() {
            info!(
                timed_out = report.timed_out.len(),
                abandoned = report.abandoned.len(),
                purged = report.purged.len(),
                "stale sessions swept"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use matchforge_backend::{BackendError, MemoryBackend, ResultCode};

    use super::*;

    fn orchestrator() -> Orchestrator<MemoryBackend> {
        Orchestrator::new(Arc::new(MemoryBackend::new()), OrchestratorConfig::default())
    }

    /// Collects formatted log output for the current thread.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogBuffer {
        fn capture(&self, f: impl FnOnce()) {
            let writer = self.clone();
            let subscriber = tracing_subscriber::fmt()
                .with_ansi(false)
                .with_max_level(tracing::Level::DEBUG)
                .with_writer(move || writer.clone())
                .finish();
            tracing::subscriber::with_default(subscriber, f);
        }

        fn line_containing(&self, needle: &str) -> String {
            let output = String::from_utf8(self.0.lock().unwrap().clone()).unwrap();
            output
                .lines()
                .find(|line| line.contains(needle))
                .unwrap_or_else(|| panic!("no log line contains {needle:?}:\n{output}"))
                .to_owned()
        }
    }

    #[test]
    fn test_create_empty_name_is_invalid_request() {
        let orch = orchestrator();

        let err = orch.create_session("  ", "bucket", 2).unwrap_err();

        assert!(matches!(err, SessionError::InvalidRequest(_)));
        assert_eq!(orch.backend().counters().acquired, 0);
    }

    #[test]
    fn test_create_zero_players_is_invalid_request() {
        let orch = orchestrator();
        let err = orch.create_session("m", "bucket", 0).unwrap_err();
        assert!(matches!(err, SessionError::InvalidRequest(_)));
    }

    #[test]
    fn test_create_registers_pending_commit_before_pump() {
        let orch = orchestrator();

        let accepted = orch.create_session("m", "bucket", 2).unwrap();

        assert_eq!(accepted.value, "m");
        let session = orch.session("m").unwrap();
        assert_eq!(session.state, SessionState::PendingCommit);
        assert_eq!(orch.backend().counters().consumed, 1);
    }

    #[test]
    fn test_create_commit_rejected_unregisters() {
        let orch = orchestrator();
        orch.backend().fail_next(Operation::Commit, ResultCode::Other(5));

        let err = orch.create_session("m", "bucket", 2).unwrap_err();

        assert!(matches!(
            err,
            SessionError::Backend { operation: Operation::Commit, .. }
        ));
        assert!(orch.session("m").is_none());
        assert_eq!(orch.backend().counters().outstanding(), 0);
    }

    #[test]
    fn test_create_uninitialized_backend_fails_fast() {
        let orch = Orchestrator::new(
            Arc::new(MemoryBackend::uninitialized()),
            OrchestratorConfig::default(),
        );

        let err = orch.create_session("m", "bucket", 2).unwrap_err();

        assert_eq!(err.backend_error(), Some(&BackendError::NotInitialized));
        assert!(orch.sessions().is_empty());
    }

    #[test]
    fn test_start_untracked_not_found_logs_warning() {
        let orch = orchestrator();
        let logs = LogBuffer::default();

        logs.capture(|| {
            let _ = orch.start_session("ghost").unwrap();
            orch.backend().pump_events().unwrap();
        });

        let line = logs.line_containing("start failed for untracked session");
        assert!(line.contains("WARN"), "{line}");
        assert!(line.contains("NotFound"), "{line}");
        assert!(orch.session("ghost").is_none());
    }

    #[test]
    fn test_destroy_pending_commit_moves_to_pending_destroy() {
        let orch = orchestrator();
        let _ = orch.create_session("m", "bucket", 2).unwrap();

        let _ = orch.destroy_session("m").unwrap();

        assert_eq!(orch.session("m").unwrap().state, SessionState::PendingDestroy);
    }
}
