//! Fixed-timestep scheduler that sets the pump's cadence.
//!
//! The backend only makes progress while it is pumped, so the scheduler's
//! job is to keep pumps evenly spaced and to notice when they are not:
//! late wake-ups are counted as skipped intervals, long skip runs are
//! reported, and each pump's execution time is measured against the
//! interval budget.

use std::time::{Duration, Instant};

use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when a tick wakes up late.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickPolicy {
    /// Count the missed intervals as skipped and resume from now.
    #[default]
    Skip,
    /// Fire missed ticks back to back, at most `max_catchup` of them.
    CatchUp {
        /// Beyond this many missed intervals the rest are skipped.
        max_catchup: u32,
    },
    /// Ignore the delay and keep the original schedule.
    Drop,
}

/// Configuration for [`TickScheduler`].
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Tick rate in Hz, clamped to `1..=MAX_TICK_RATE_HZ`.
    pub tick_rate_hz: u32,
    /// Late wake-up handling.
    pub policy: TickPolicy,
    /// Fraction of the interval (0.0–1.0) above which a pump that ran
    /// too long is logged as a warning.
    pub budget_warn_threshold: f64,
    /// Fraction of the interval above which it is logged as critical.
    pub budget_critical_threshold: f64,
    /// Longest tolerated run of skipped intervals before a pump is
    /// reported as starved.
    pub max_consecutive_skips: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: Self::DEFAULT_TICK_RATE_HZ,
            policy: TickPolicy::default(),
            budget_warn_threshold: 0.80,
            budget_critical_threshold: 1.0,
            max_consecutive_skips: 4,
        }
    }
}

impl TickConfig {
    /// 4 ms between pumps.
    pub const DEFAULT_TICK_RATE_HZ: u32 = 250;
    /// 1 ms between pumps.
    pub const MAX_TICK_RATE_HZ: u32 = 1000;

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self {
            tick_rate_hz,
            ..Default::default()
        }
    }

    /// Clamps out-of-range values. Called by [`TickScheduler::new`].
    pub fn validated(mut self) -> Self {
        if self.tick_rate_hz == 0 {
            warn!("tick_rate_hz of 0 would never pump, using 1");
            self.tick_rate_hz = 1;
        }
        if self.tick_rate_hz > Self::MAX_TICK_RATE_HZ {
            warn!(
                rate = self.tick_rate_hz,
                max = Self::MAX_TICK_RATE_HZ,
                "tick_rate_hz exceeds maximum, clamping"
            );
            self.tick_rate_hz = Self::MAX_TICK_RATE_HZ;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self.budget_critical_threshold =
            self.budget_critical_threshold.clamp(0.0, 1.0);
        if self.budget_warn_threshold > self.budget_critical_threshold {
            self.budget_warn_threshold = self.budget_critical_threshold;
        }
        self
    }

    /// Interval between two ticks, truncated to whole nanoseconds.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.tick_rate_hz.max(1)))
    }
}

// ---------------------------------------------------------------------------
// Tick info and metrics
// ---------------------------------------------------------------------------

/// Returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Tick number, starting at 1.
    pub tick: u64,
    /// The configured interval.
    pub interval: Duration,
    /// The tick woke up more than 10% of an interval late.
    pub overrun: bool,
    /// Intervals skipped because of this overrun.
    pub ticks_skipped: u64,
    /// The skip run exceeded `max_consecutive_skips`.
    pub starved: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TickMetrics {
    pub total_ticks: u64,
    pub total_overruns: u64,
    pub total_skipped: u64,
    /// Longest run of intervals skipped by a single late wake-up.
    pub longest_skip_run: u64,
    /// Exponential moving average of tick execution time (α = 0.1).
    pub avg_tick_time: Duration,
    pub max_tick_time: Duration,
    /// Last execution time divided by the interval. Above 1.0 is overrun.
    pub budget_utilization: f64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-timestep tick scheduler. One per pump loop.
pub struct TickScheduler {
    config: TickConfig,
    interval: Duration,
    tick_count: u64,
    next_tick: TokioInstant,
    /// Set by `wait_for_tick`, consumed by `record_tick_end`.
    tick_start: Option<Instant>,
    metrics: TickMetrics,
}

impl TickScheduler {
    /// Creates a scheduler whose first tick is one interval from now.
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let interval = config.tick_duration();

        debug!(
            rate_hz = config.tick_rate_hz,
            interval_ms = interval.as_secs_f64() * 1000.0,
            policy = ?config.policy,
            "tick scheduler created"
        );

        Self {
            config,
            interval,
            tick_count: 0,
            next_tick: TokioInstant::now() + interval,
            tick_start: None,
            metrics: TickMetrics::default(),
        }
    }

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(tick_rate_hz))
    }

    /// Sleeps until the next tick is due and reports on it.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let scheduled = self.next_tick;
        time::sleep_until(scheduled).await;

        let now = TokioInstant::now();
        self.tick_count += 1;
        self.tick_start = Some(Instant::now());

        let late_by = now.saturating_duration_since(scheduled);
        let overrun = late_by > self.interval / 10;
        let behind = if overrun {
            (late_by.as_nanos() / self.interval.as_nanos()) as u64
        } else {
            0
        };

        let (next, ticks_skipped) = match self.config.policy {
            TickPolicy::Skip => (now + self.interval, behind),
            TickPolicy::CatchUp { max_catchup } => {
                if behind <= max_catchup as u64 {
                    // Already due when behind, so missed ticks fire back to back.
                    (scheduled + self.interval, 0)
                } else {
                    (now + self.interval, behind - max_catchup as u64)
                }
            }
            TickPolicy::Drop => (scheduled + self.interval, 0),
        };
        self.next_tick = next;

        let starved = ticks_skipped > self.config.max_consecutive_skips;
        if ticks_skipped > 0 {
            let late_ms = late_by.as_secs_f64() * 1000.0;
            if starved {
                warn!(
                    tick = self.tick_count,
                    skipped = ticks_skipped,
                    limit = self.config.max_consecutive_skips,
                    late_ms,
                    "pump starved: too many consecutive intervals skipped"
                );
            } else {
                debug!(
                    tick = self.tick_count,
                    skipped = ticks_skipped,
                    late_ms,
                    "tick overrun, skipping ahead"
                );
            }
        }

        if overrun {
            self.metrics.total_overruns += 1;
        }
        self.metrics.total_skipped += ticks_skipped;
        self.metrics.longest_skip_run =
            self.metrics.longest_skip_run.max(ticks_skipped);
        self.metrics.total_ticks += 1;

        trace!(tick = self.tick_count, overrun, "tick fired");

        TickInfo {
            tick: self.tick_count,
            interval: self.interval,
            overrun,
            ticks_skipped,
            starved,
        }
    }

    /// Records that the work for the current tick has finished.
    ///
    /// Without this call no budget warnings or timing metrics are
    /// produced. Calling it twice, or before any tick, is a no-op.
    pub fn record_tick_end(&mut self) {
        let Some(start) = self.tick_start.take() else {
            return;
        };
        let elapsed = start.elapsed();

        let utilization = elapsed.as_secs_f64() / self.interval.as_secs_f64();
        self.metrics.budget_utilization = utilization;

        if utilization >= self.config.budget_critical_threshold {
            warn!(
                tick = self.tick_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = self.interval.as_secs_f64() * 1000.0,
                "pump exceeded its interval"
            );
        } else if utilization >= self.config.budget_warn_threshold {
            debug!(
                tick = self.tick_count,
                utilization_pct = format!("{:.1}", utilization * 100.0),
                "pump approaching its interval"
            );
        }

        self.metrics.max_tick_time = self.metrics.max_tick_time.max(elapsed);
        let alpha = 0.1;
        let prev = self.metrics.avg_tick_time.as_secs_f64();
        self.metrics.avg_tick_time = Duration::from_secs_f64(
            prev * (1.0 - alpha) + elapsed.as_secs_f64() * alpha,
        );
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }

    pub fn tick_rate_hz(&self) -> u32 {
        self.config.tick_rate_hz
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
