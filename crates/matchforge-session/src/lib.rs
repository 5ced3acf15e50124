//! Match session lifecycle orchestration for Matchforge.
//!
//! This crate owns the core state machine:
//!
//! 1. **Intents**: [`Orchestrator`] turns create / start / destroy
//!    requests into backend calls and returns as soon as they are accepted
//! 2. **Completions**: the backend's callbacks, run by the event pump,
//!    record each outcome in the [`SessionRegistry`]; callers that care
//!    can await the [`Completion`] instead
//! 3. **Timeouts**: [`Orchestrator::sweep_stale`] gives up on records
//!    whose completion never arrived
//!
//! # How it fits in the stack
//!
//! ```text
//! API Gateway (above)  ← translates HTTP requests into intents
//!     ↕
//! Session Layer (this crate)  ← session records and their lifecycle
//!     ↕
//! Backend (below)  ← handle-based SDK, completions delivered by the pump
//! ```

mod completion;
mod error;
mod orchestrator;
mod registry;
mod session;

pub use completion::{Accepted, Completion};
pub use error::SessionError;
pub use orchestrator::Orchestrator;
pub use registry::{SessionRegistry, SweepReport};
pub use session::{
    FailureReason, OrchestratorConfig, Session, SessionInstance, SessionState,
};
