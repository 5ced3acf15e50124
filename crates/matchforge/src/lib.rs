//! # Matchforge
//!
//! HTTP service that creates, starts and destroys two-player match
//! sessions on an asynchronous, callback-driven session backend.
//!
//! The service is a thin layer over three crates:
//!
//! - `matchforge-backend`: the [`SessionBackend`] trait and the in-memory
//!   backend
//! - `matchforge-pump`: the event pump that makes backend operations
//!   complete
//! - `matchforge-session`: the [`Orchestrator`] and its session registry
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use matchforge::prelude::*;
//!
//! # async fn run() -> Result<(), MatchforgeError> {
//! let config = ServerConfig::from_env()?;
//! let backend = Arc::new(MemoryBackend::initialize(&config.credentials)?);
//! let server = MatchforgeServerBuilder::from_config(&config)
//!     .build(backend)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod handler;
mod server;

pub use config::{ConfigError, DEFAULT_BUCKET_ID, DEFAULT_MAX_PLAYERS, ServerConfig};
pub use error::{ApiError, MatchforgeError};
pub use handler::{IntentResponse, MatchRequest, SessionList, SessionView, session_name};
pub use matchforge_backend::SessionBackend;
pub use matchforge_session::Orchestrator;
pub use server::{
    AppContext, MatchforgeServer, MatchforgeServerBuilder, SessionDefaults, build_router,
};

pub mod prelude {
    pub use crate::{
        AppContext, ConfigError, DEFAULT_BUCKET_ID, MatchforgeError, MatchforgeServer,
        MatchforgeServerBuilder, ServerConfig, SessionDefaults, build_router,
    };
    pub use matchforge_backend::{
        BackendCredentials, BackendError, MemoryBackend, Operation, ResultCode, SessionBackend,
    };
    pub use matchforge_pump::{PumpConfig, TickConfig};
    pub use matchforge_session::{
        Orchestrator, OrchestratorConfig, Session, SessionError, SessionState,
    };
}
