//! The session registry: every session the orchestrator is tracking.
//!
//! The registry is where request handlers and pump-delivered completions
//! meet. Each method here is one complete mutation, so a record's state,
//! last result and instance always come from the same instance and are
//! never observed half-updated.
//!
//! # Concurrency note
//!
//! `SessionRegistry` is NOT thread-safe by itself. The orchestrator keeps
//! it behind a `std::sync::Mutex` and calls exactly one of these methods
//! per critical section. Nothing here blocks or calls into the backend.

use std::collections::HashMap;

use matchforge_backend::{Operation, ResultCode};

use crate::{FailureReason, OrchestratorConfig, Session, SessionInstance, SessionState};

/// Names touched by one [`SessionRegistry::sweep`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// `PendingCommit` records marked `Failed(TimedOut)`.
    pub timed_out: Vec<String>,
    /// `PendingDestroy` records dropped without a confirmation.
    pub abandoned: Vec<String>,
    /// `Failed` records removed after their retention period.
    pub purged: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.timed_out.is_empty() && self.abandoned.is_empty() && self.purged.is_empty()
    }
}

/// Tracks session records by name.
///
/// ## Lifecycle
///
/// ```text
/// insert() ──→ apply_commit_result() ──→ mark_pending_destroy() ──→ apply_destroy_result()
///   [PendingCommit]     [Active]               [PendingDestroy]          (removed)
///        │                                            │
///        ▼ sweep(): commit timeout                    ▼ sweep(): destroy timeout
///   [Failed(TimedOut)] ──→ sweep(): retention ──→ (removed)
/// ```
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a record, returning the one it replaced, if any.
    pub fn insert(&mut self, session: Session) -> Option<Session> {
        self.sessions.insert(session.name.clone(), session)
    }

    /// Removes the record for `name` if it still belongs to `instance`.
    pub fn remove_instance(
        &mut self,
        name: &str,
        instance: SessionInstance,
    ) -> Option<Session> {
        if self.instance_of(name)? != instance {
            return None;
        }
        self.sessions.remove(name)
    }

    /// The instance currently registered under `name`.
    pub fn instance_of(&self, name: &str) -> Option<SessionInstance> {
        self.sessions.get(name).map(|s| s.instance)
    }

    pub fn get(&self, name: &str) -> Option<&Session> {
        self.sessions.get(name)
    }

    /// Clones of every record, sorted by name.
    pub fn records(&self) -> Vec<Session> {
        let mut all: Vec<Session> = self.sessions.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Looks up the record for `name`, but only if it is `instance`.
    /// Logs and returns `None` for stale completions.
    fn matching_mut(
        &mut self,
        name: &str,
        instance: SessionInstance,
        operation: Operation,
        code: ResultCode,
    ) -> Option<&mut Session> {
        match self.sessions.get_mut(name) {
            Some(session) if session.instance == instance => Some(session),
            Some(session) => {
                tracing::debug!(
                    session = name,
                    %instance,
                    current = %session.instance,
                    %operation,
                    %code,
                    "stale completion ignored"
                );
                None
            }
            None => {
                tracing::debug!(
                    session = name,
                    %instance,
                    %operation,
                    %code,
                    "completion for untracked session ignored"
                );
                None
            }
        }
    }

    /// Applies a commit completion. Returns `false` if it was stale.
    pub fn apply_commit_result(
        &mut self,
        name: &str,
        instance: SessionInstance,
        code: ResultCode,
    ) -> bool {
        let Some(session) = self.matching_mut(name, instance, Operation::Commit, code) else {
            return false;
        };

        match code {
            ResultCode::Success => {
                if session.transition(SessionState::Active) {
                    session.last_result = None;
                    tracing::info!(session = name, %instance, "session active");
                } else if session.state.failure().is_some() {
                    // The remote session is live but nothing tracks it.
                    session.last_result = Some(code);
                    tracing::warn!(
                        session = name,
                        %instance,
                        state = %session.state,
                        "commit confirmed after session failed, remote session orphaned"
                    );
                } else {
                    // e.g. a destroy was requested before the commit landed
                    session.last_result = Some(code);
                    tracing::info!(
                        session = name,
                        %instance,
                        state = %session.state,
                        "commit confirmed after session moved on"
                    );
                }
            }
            ResultCode::OutOfSync => {
                session.last_result = Some(code);
                tracing::warn!(
                    session = name,
                    %instance,
                    operation = %Operation::Commit,
                    %code,
                    "commit will sync later, session stays pending"
                );
            }
            _ => {
                session.last_result = Some(code);
                session.transition(SessionState::Failed(FailureReason::Backend(code)));
                tracing::warn!(
                    session = name,
                    %instance,
                    operation = %Operation::Commit,
                    %code,
                    state = %session.state,
                    "commit failed"
                );
            }
        }
        true
    }

    /// Applies a start completion. Returns `false` if it was stale.
    pub fn apply_start_result(
        &mut self,
        name: &str,
        instance: SessionInstance,
        code: ResultCode,
    ) -> bool {
        let Some(session) = self.matching_mut(name, instance, Operation::Start, code) else {
            return false;
        };
        session.last_result = Some(code);

        match code {
            ResultCode::Success => {
                session.started = true;
                tracing::info!(session = name, %instance, "session started");
            }
            ResultCode::NotFound => {
                tracing::info!(
                    session = name,
                    %instance,
                    operation = %Operation::Start,
                    %code,
                    "backend does not know the session"
                );
            }
            ResultCode::OutOfSync => {
                tracing::warn!(
                    session = name,
                    %instance,
                    operation = %Operation::Start,
                    %code,
                    "start will sync later"
                );
            }
            _ => {
                session.transition(SessionState::Failed(FailureReason::Backend(code)));
                tracing::warn!(
                    session = name,
                    %instance,
                    operation = %Operation::Start,
                    %code,
                    state = %session.state,
                    "start failed"
                );
            }
        }
        true
    }

    /// Moves a non-terminal record to `PendingDestroy`.
    /// Returns `false` if the record is gone, stale, or already terminal.
    pub fn mark_pending_destroy(&mut self, name: &str, instance: SessionInstance) -> bool {
        match self.sessions.get_mut(name) {
            Some(session) if session.instance == instance => {
                session.transition(SessionState::PendingDestroy)
            }
            _ => false,
        }
    }

    /// Applies a destroy completion. Success removes the record; anything
    /// else is recorded and left for the sweep. Returns `false` if the
    /// completion was stale.
    pub fn apply_destroy_result(
        &mut self,
        name: &str,
        instance: SessionInstance,
        code: ResultCode,
    ) -> bool {
        let Some(session) = self.matching_mut(name, instance, Operation::Destroy, code) else {
            return false;
        };

        if code.is_success() {
            session.transition(SessionState::Destroyed);
            self.sessions.remove(name);
            tracing::info!(session = name, %instance, "session destroyed");
        } else {
            session.last_result = Some(code);
            tracing::warn!(
                session = name,
                %instance,
                operation = %Operation::Destroy,
                %code,
                "destroy failed, session left pending"
            );
        }
        true
    }

    /// Applies the timeout policy.
    ///
    /// Call this periodically. Records that have waited too long for a
    /// completion are failed or dropped, and failed records past their
    /// retention period are removed.
    pub fn sweep(&mut self, config: &OrchestratorConfig) -> SweepReport {
        let mut report = SweepReport::default();

        for session in self.sessions.values_mut() {
            if session.state == SessionState::PendingCommit
                && session.time_in_state() >= config.commit_timeout
            {
                session.transition(SessionState::Failed(FailureReason::TimedOut));
                report.timed_out.push(session.name.clone());
                tracing::warn!(
                    session = %session.name,
                    instance = %session.instance,
                    "commit timed out"
                );
            }
        }

        self.sessions.retain(|name, session| {
            let expired = match session.state {
                SessionState::PendingDestroy => {
                    session.time_in_state() >= config.destroy_timeout
                }
                SessionState::Failed(_) => {
                    session.time_in_state() >= config.failed_retention
                }
                _ => false,
            };
            if !expired {
                return true;
            }
            if session.state == SessionState::PendingDestroy {
                tracing::warn!(
                    session = %name,
                    instance = %session.instance,
                    "destroy never confirmed, dropping session"
                );
                report.abandoned.push(name.clone());
            } else {
                tracing::debug!(session = %name, "failed session purged");
                report.purged.push(name.clone());
            }
            false
        });

        report.abandoned.sort();
        report.purged.sort();
        report.timed_out.sort();
        report
    }
}

// =========================================================================
// Tests
// =========================================================================
