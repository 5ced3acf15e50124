//! The event pump task.
//!
//! A single Tokio task owns the pump loop: it waits for the next tick,
//! calls [`SessionBackend::pump_events`], and records timing. Because the
//! loop is the only caller, pumps can never overlap. Completion callbacks
//! run inside `pump_events`, so they execute on this task too.
//!
//! The task stops when its [`CancellationToken`] is cancelled. Before
//! exiting it pumps a few more times so completions that were already in
//! flight still get delivered.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use matchforge_backend::SessionBackend;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{TickConfig, TickMetrics, TickScheduler};

// ---------------------------------------------------------------------------
// Configuration and stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Cadence and overrun handling.
    pub tick: TickConfig,
    /// Extra pumps performed after cancellation, one interval apart.
    pub drain_ticks: u32,
    /// Log a heartbeat every this many ticks. 0 disables it.
    pub heartbeat_every: u64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self::with_rate(TickConfig::DEFAULT_TICK_RATE_HZ)
    }
}

impl PumpConfig {
    /// Config for `tick_rate_hz`, with a heartbeat roughly every 5 seconds.
    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self {
            tick: TickConfig::with_rate(tick_rate_hz),
            drain_ticks: 8,
            heartbeat_every: u64::from(tick_rate_hz.max(1)) * 5,
        }
    }
}

/// Counters published by a running pump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Calls made to `pump_events`.
    pub iterations: u64,
    /// Completion callbacks fired across all pumps.
    pub events_fired: u64,
    /// Pumps that returned an error.
    pub errors: u64,
}

#[derive(Default)]
struct PumpCounters {
    iterations: AtomicU64,
    events_fired: AtomicU64,
    errors: AtomicU64,
}

impl PumpCounters {
    fn snapshot(&self) -> PumpStats {
        PumpStats {
            iterations: self.iterations.load(Ordering::Relaxed),
            events_fired: self.events_fired.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a running event pump.
pub struct PumpHandle {
    cancel: CancellationToken,
    task: JoinHandle<TickMetrics>,
    counters: Arc<PumpCounters>,
}

impl PumpHandle {
    pub fn stats(&self) -> PumpStats {
        self.counters.snapshot()
    }

    /// Whether the pump task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the pump, waits for it to drain, and returns its final
    /// tick metrics.
    pub async fn shutdown(self) -> Result<TickMetrics, JoinError> {
        self.cancel.cancel();
        self.task.await
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct PumpActor<B: SessionBackend> {
    backend: Arc<B>,
    scheduler: TickScheduler,
    config: PumpConfig,
    counters: Arc<PumpCounters>,
    cancel: CancellationToken,
    consecutive_errors: u64,
}

impl<B: SessionBackend> PumpActor<B> {
    async fn run(mut self) -> TickMetrics {
        info!(
            rate_hz = self.scheduler.tick_rate_hz(),
            "event pump started"
        );

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                tick = self.scheduler.wait_for_tick() => {
                    self.pump_once();
                    self.scheduler.record_tick_end();

                    let every = self.config.heartbeat_every;
                    if every > 0 && tick.tick % every == 0 {
                        let stats = self.counters.snapshot();
                        debug!(
                            tick = tick.tick,
                            events_fired = stats.events_fired,
                            errors = stats.errors,
                            "event pump running"
                        );
                    }
                }
            }
        }

        self.drain().await;

        let metrics = self.scheduler.metrics().clone();
        let stats = self.counters.snapshot();
        info!(
            ticks = metrics.total_ticks,
            overruns = metrics.total_overruns,
            skipped = metrics.total_skipped,
            events_fired = stats.events_fired,
            errors = stats.errors,
            "event pump stopped"
        );
        metrics
    }

    async fn drain(&mut self) {
        if self.config.drain_ticks == 0 {
            return;
        }
        debug!(pumps = self.config.drain_ticks, "draining in-flight completions");
        let interval = self.scheduler.interval();
        for _ in 0..self.config.drain_ticks {
            self.pump_once();
            tokio::time::sleep(interval).await;
        }
    }

    /// One call into the backend. Errors are counted and logged, never
    /// propagated: the pump has no caller to report to.
    fn pump_once(&mut self) {
        self.counters.iterations.fetch_add(1, Ordering::Relaxed);

        match self.backend.pump_events() {
            Ok(fired) => {
                if self.consecutive_errors > 0 {
                    info!(
                        failed_pumps = self.consecutive_errors,
                        "backend pump recovered"
                    );
                    self.consecutive_errors = 0;
                }
                if fired > 0 {
                    self.counters
                        .events_fired
                        .fetch_add(fired as u64, Ordering::Relaxed);
                    trace!(fired, "completions delivered");
                }
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                self.consecutive_errors += 1;

                // First failure of a streak, then once per heartbeat.
                let every = self.config.heartbeat_every;
                if self.consecutive_errors == 1
                    || (every > 0 && self.consecutive_errors % every == 0)
                {
                    warn!(
                        error = %e,
                        consecutive = self.consecutive_errors,
                        "backend pump failed"
                    );
                }
            }
        }
    }
}

/// Spawns the event pump for an initialized backend.
///
/// Only one pump may run per backend. The pump stops when `cancel` is
/// cancelled or when [`PumpHandle::shutdown`] is called.
pub fn spawn_event_pump<B: SessionBackend>(
    backend: Arc<B>,
    config: PumpConfig,
    cancel: CancellationToken,
) -> PumpHandle {
    let counters = Arc::new(PumpCounters::default());

    let actor = PumpActor {
        backend,
        scheduler: TickScheduler::new(config.tick.clone()),
        config,
        counters: Arc::clone(&counters),
        cancel: cancel.clone(),
        consecutive_errors: 0,
    };

    let task = tokio::spawn(actor.run());

    PumpHandle {
        cancel,
        task,
        counters,
    }
}
