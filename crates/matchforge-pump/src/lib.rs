//! Backend event pump for Matchforge.
//!
//! Asynchronous backend operations only complete while something calls
//! the backend's "process pending events" entry point. This crate
//! provides the fixed-cadence loop that does it:
//!
//! - [`TickScheduler`] keeps pumps evenly spaced (1–1000 Hz), detects
//!   late wake-ups and tracks how long each pump takes.
//! - [`spawn_event_pump`] runs the loop on a dedicated task and returns a
//!   [`PumpHandle`] for stats and graceful shutdown.
//!
//! ```ignore
//! let cancel = CancellationToken::new();
//! let pump = spawn_event_pump(Arc::clone(&backend), PumpConfig::with_rate(250), cancel.clone());
//! // ... serve requests ...
//! let metrics = pump.shutdown().await?;
//! ```

mod pump;
mod scheduler;

pub use pump::{PumpConfig, PumpHandle, PumpStats, spawn_event_pump};
pub use scheduler::{TickConfig, TickInfo, TickMetrics, TickPolicy, TickScheduler};
