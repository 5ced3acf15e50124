//! In-process session backend.
//!
//! `MemoryBackend` keeps the "server side" of every committed session in
//! a map and queues completions until [`pump_events`] runs, the same way
//! a networked SDK only delivers results while it is being ticked.
//! Completions fire in the order their operations were accepted.
//!
//! Besides serving as the default backend of the binary, it is the test
//! double for everything above it: handle counters expose leaks, and
//! faults or scripted result codes can be injected per operation.
//!
//! [`pump_events`]: crate::SessionBackend::pump_events

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{
    BackendCredentials, BackendError, Callback, Operation, ResultCode,
    SessionBackend,
};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Modification handle issued by [`MemoryBackend`].
#[derive(Debug)]
pub struct MemoryHandle {
    id: u64,
    name: String,
    bucket_id: String,
    max_players: u32,
}

impl MemoryHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bucket_id(&self) -> &str {
        &self.bucket_id
    }

    pub fn max_players(&self) -> u32 {
        self.max_players
    }
}

/// A session as the backend sees it after a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSession {
    pub bucket_id: String,
    pub max_players: u32,
    pub started: bool,
}

/// Handle bookkeeping, for leak checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandleCounters {
    /// Handles handed out by `begin_session_modification`.
    pub acquired: u64,
    /// Handles returned through `release_handle`, or released by the
    /// backend after a rejected commit.
    pub released: u64,
    /// Handles consumed by an accepted commit.
    pub consumed: u64,
}

impl HandleCounters {
    /// Handles that are neither released nor consumed.
    pub fn outstanding(&self) -> u64 {
        self.acquired
            .saturating_sub(self.released)
            .saturating_sub(self.consumed)
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

enum PendingOp {
    Commit {
        name: String,
        bucket_id: String,
        max_players: u32,
    },
    Start {
        name: String,
    },
    Destroy {
        name: String,
    },
}

impl PendingOp {
    fn operation(&self) -> Operation {
        match self {
            Self::Commit { .. } => Operation::Commit,
            Self::Start { .. } => Operation::Start,
            Self::Destroy { .. } => Operation::Destroy,
        }
    }

    fn name(&self) -> &str {
        match self {
            Self::Commit { name, .. }
            | Self::Start { name }
            | Self::Destroy { name } => name,
        }
    }
}

struct Queued {
    op: PendingOp,
    callback: Callback,
}

struct State {
    initialized: bool,
    next_handle: u64,
    sessions: HashMap<String, RemoteSession>,
    queue: VecDeque<Queued>,
    /// Next synchronous call of the operation fails with this code.
    sync_faults: HashMap<Operation, ResultCode>,
    /// Next completions of the operation report these codes, in order.
    scripted: HashMap<Operation, VecDeque<ResultCode>>,
    events_per_pump: Option<usize>,
    counters: HandleCounters,
    pump_count: u64,
}

impl State {
    fn new(initialized: bool) -> Self {
        Self {
            initialized,
            next_handle: 1,
            sessions: HashMap::new(),
            queue: VecDeque::new(),
            sync_faults: HashMap::new(),
            scripted: HashMap::new(),
            events_per_pump: None,
            counters: HandleCounters::default(),
            pump_count: 0,
        }
    }

    fn check_ready(&mut self, operation: Operation) -> Result<(), BackendError> {
        if !self.initialized {
            return Err(BackendError::NotInitialized);
        }
        match self.sync_faults.remove(&operation) {
            Some(code) => Err(BackendError::rejected(operation, code)),
            None => Ok(()),
        }
    }

    fn enqueue(&mut self, op: PendingOp, callback: Callback) {
        tracing::trace!(
            session = op.name(),
            operation = %op.operation(),
            queued = self.queue.len() + 1,
            "completion queued"
        );
        self.queue.push_back(Queued { op, callback });
    }

    /// Decides the result of a queued operation and applies its effect.
    fn resolve(&mut self, op: &PendingOp) -> ResultCode {
        let scripted = self
            .scripted
            .get_mut(&op.operation())
            .and_then(VecDeque::pop_front);

        match scripted {
            Some(code) => {
                if code.is_success() {
                    self.apply(op);
                }
                code
            }
            None => self.apply(op),
        }
    }

    fn apply(&mut self, op: &PendingOp) -> ResultCode {
        match op {
            PendingOp::Commit {
                name,
                bucket_id,
                max_players,
            } => {
                if self.sessions.contains_key(name) {
                    return ResultCode::ALREADY_EXISTS;
                }
                self.sessions.insert(
                    name.clone(),
                    RemoteSession {
                        bucket_id: bucket_id.clone(),
                        max_players: *max_players,
                        started: false,
                    },
                );
                ResultCode::Success
            }
            PendingOp::Start { name } => match self.sessions.get_mut(name) {
                Some(session) => {
                    session.started = true;
                    ResultCode::Success
                }
                None => ResultCode::NotFound,
            },
            PendingOp::Destroy { name } => match self.sessions.remove(name) {
                Some(_) => ResultCode::Success,
                None => ResultCode::NotFound,
            },
        }
    }
}

/// Clears the pumping flag when a pump ends, including by panic.
struct PumpFlag<'a>(&'a AtomicBool);

impl Drop for PumpFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// MemoryBackend
// ---------------------------------------------------------------------------

/// In-memory [`SessionBackend`].
pub struct MemoryBackend {
    state: Mutex<State>,
    pumping: AtomicBool,
}

impl MemoryBackend {
    /// Creates an initialized backend with no sessions.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::new(true)),
            pumping: AtomicBool::new(false),
        }
    }

    /// Brings the backend up after validating the credentials.
    ///
    /// # Errors
    /// [`BackendError::InvalidCredentials`] if any credential is empty.
    pub fn initialize(
        credentials: &BackendCredentials,
    ) -> Result<Self, BackendError> {
        if let Some(field) = credentials.first_missing() {
            return Err(BackendError::InvalidCredentials(format!(
                "{field} is empty"
            )));
        }
        tracing::info!(
            product_id = %credentials.product_id,
            sandbox_id = %credentials.sandbox_id,
            deployment_id = %credentials.deployment_id,
            "in-memory session backend initialized"
        );
        Ok(Self::new())
    }

    /// Creates a backend that rejects every call with
    /// [`BackendError::NotInitialized`].
    pub fn uninitialized() -> Self {
        Self {
            state: Mutex::new(State::new(false)),
            pumping: AtomicBool::new(false),
        }
    }

    /// Limits how many completions a single pump fires.
    #[must_use]
    pub fn with_events_per_pump(self, limit: usize) -> Self {
        self.set_events_per_pump(Some(limit));
        self
    }

    /// Changes the per-pump completion limit. `None` drains the queue.
    pub fn set_events_per_pump(&self, limit: Option<usize>) {
        self.lock().events_per_pump = limit;
    }

    /// Makes the next synchronous call of `operation` fail with `code`.
    pub fn fail_next(&self, operation: Operation, code: ResultCode) {
        self.lock().sync_faults.insert(operation, code);
    }

    /// Makes the next completion of `operation` report `code`.
    ///
    /// Scripted codes queue up per operation. A scripted non-success code
    /// leaves the backend's sessions untouched.
    pub fn script_completion(&self, operation: Operation, code: ResultCode) {
        self.lock()
            .scripted
            .entry(operation)
            .or_default()
            .push_back(code);
    }

    pub fn counters(&self) -> HandleCounters {
        self.lock().counters
    }

    /// Completions queued and not yet fired.
    pub fn pending_events(&self) -> usize {
        self.lock().queue.len()
    }

    /// Number of `pump_events` calls that ran (re-entrant calls excluded).
    pub fn pump_count(&self) -> u64 {
        self.lock().pump_count
    }

    pub fn remote_session(&self, name: &str) -> Option<RemoteSession> {
        self.lock().sessions.get(name).cloned()
    }

    pub fn remote_session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBackend for MemoryBackend {
    type Handle = MemoryHandle;

    fn begin_session_modification(
        &self,
        name: &str,
        bucket_id: &str,
        max_players: u32,
    ) -> Result<MemoryHandle, BackendError> {
        let mut state = self.lock();
        state.check_ready(Operation::BeginModification)?;
        if name.is_empty() || max_players == 0 {
            return Err(BackendError::rejected(
                Operation::BeginModification,
                ResultCode::InvalidParameters,
            ));
        }

        let id = state.next_handle;
        state.next_handle += 1;
        state.counters.acquired += 1;

        tracing::trace!(session = name, handle = id, "modification handle issued");
        Ok(MemoryHandle {
            id,
            name: name.to_owned(),
            bucket_id: bucket_id.to_owned(),
            max_players,
        })
    }

    fn set_bucket_id(
        &self,
        handle: &mut MemoryHandle,
        bucket_id: &str,
    ) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.check_ready(Operation::SetBucketId)?;
        if bucket_id.is_empty() {
            return Err(BackendError::rejected(
                Operation::SetBucketId,
                ResultCode::InvalidParameters,
            ));
        }
        handle.bucket_id = bucket_id.to_owned();
        Ok(())
    }

    fn release_handle(&self, handle: MemoryHandle) {
        self.lock().counters.released += 1;
        tracing::trace!(handle = handle.id, "modification handle released");
    }

    fn commit_session(
        &self,
        handle: MemoryHandle,
        on_complete: Callback,
    ) -> Result<(), BackendError> {
        let mut state = self.lock();
        if let Err(e) = state.check_ready(Operation::Commit) {
            state.counters.released += 1;
            return Err(e);
        }
        state.counters.consumed += 1;
        state.enqueue(
            PendingOp::Commit {
                name: handle.name,
                bucket_id: handle.bucket_id,
                max_players: handle.max_players,
            },
            on_complete,
        );
        Ok(())
    }

    fn start_session(
        &self,
        name: &str,
        on_complete: Callback,
    ) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.check_ready(Operation::Start)?;
        if name.is_empty() {
            return Err(BackendError::rejected(
                Operation::Start,
                ResultCode::InvalidParameters,
            ));
        }
        state.enqueue(PendingOp::Start { name: name.to_owned() }, on_complete);
        Ok(())
    }

    fn destroy_session(
        &self,
        name: &str,
        on_complete: Callback,
    ) -> Result<(), BackendError> {
        let mut state = self.lock();
        state.check_ready(Operation::Destroy)?;
        if name.is_empty() {
            return Err(BackendError::rejected(
                Operation::Destroy,
                ResultCode::InvalidParameters,
            ));
        }
        state.enqueue(
            PendingOp::Destroy { name: name.to_owned() },
            on_complete,
        );
        Ok(())
    }

    fn pump_events(&self) -> Result<usize, BackendError> {
        if self.pumping.swap(true, Ordering::AcqRel) {
            return Err(BackendError::PumpReentered);
        }
        let _flag = PumpFlag(&self.pumping);

        // Resolve under the lock, fire after releasing it: callbacks are
        // free to call back into the backend.
        let ready = {
            let mut state = self.lock();
            if !state.initialized {
                return Err(BackendError::NotInitialized);
            }
            state.pump_count += 1;

            let budget = state
                .events_per_pump
                .unwrap_or(usize::MAX)
                .min(state.queue.len());
            let mut ready = Vec::with_capacity(budget);
            for _ in 0..budget {
                let Some(queued) = state.queue.pop_front() else {
                    break;
                };
                let code = state.resolve(&queued.op);
                tracing::debug!(
                    session = queued.op.name(),
                    operation = %queued.op.operation(),
                    %code,
                    "completion ready"
                );
                ready.push((queued.callback, code));
            }
            ready
        };

        let fired = ready.len();
        for (callback, code) in ready {
            callback(code);
        }
        Ok(fired)
    }
}
