//! Fixed-interval sweep scheduler.
//!
//! One scheduler drives one recurring sweep over every live session.
//! Rotation may therefore fire up to one interval late; tokens carry a
//! drift allowance of one interval so that lateness never opens a gap in
//! which no token is valid.

use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when the sweep task wakes up later than scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SweepPolicy {
    /// Forget the missed sweeps and schedule the next one from now.
    /// Sweeps are idempotent, so running the missed ones buys nothing.
    #[default]
    Skip,
    /// Keep the original cadence: the next sweep fires at its originally
    /// scheduled time even if that is already in the past.
    Drop,
}

/// Configuration for the sweep scheduler.
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Time between sweeps. Also the worst-case rotation lateness.
    pub interval: Duration,
    /// Lateness handling.
    pub policy: SweepPolicy,
    /// Fraction (0.0–1.0) of the interval a sweep may take before a
    /// warning is logged.
    pub budget_warn_threshold: f64,
    /// Random delay (0..max) before the first sweep, so several
    /// registries started together don't sweep in lockstep.
    pub initial_jitter: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            policy: SweepPolicy::default(),
            budget_warn_threshold: 0.5,
            initial_jitter: Duration::from_millis(50),
        }
    }
}

impl SweepConfig {
    /// Smallest interval the scheduler accepts.
    pub const MIN_INTERVAL: Duration = Duration::from_millis(10);

    /// A config sweeping every `interval`, other fields default.
    pub fn every(interval: Duration) -> Self {
        Self {
            interval,
            ..Default::default()
        }
    }

    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// Called by [`SweepScheduler::new`].
    /// - `interval` raised to at least [`Self::MIN_INTERVAL`].
    /// - `budget_warn_threshold` clamped to `0.0..=1.0`.
    pub fn validated(mut self) -> Self {
        if self.interval < Self::MIN_INTERVAL {
            warn!(
                interval_ms = self.interval.as_millis() as u64,
                min_ms = Self::MIN_INTERVAL.as_millis() as u64,
                "sweep interval below minimum, clamping"
            );
            self.interval = Self::MIN_INTERVAL;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }
}

// ---------------------------------------------------------------------------
// Per-sweep info and metrics
// ---------------------------------------------------------------------------

/// Returned by [`SweepScheduler::wait_for_sweep`] each time it fires.
#[derive(Debug, Clone)]
pub struct SweepTick {
    /// Monotonically increasing sweep number, starting at 1.
    pub sweep: u64,
    /// How far past its deadline the sweep woke up.
    pub late_by: Duration,
    /// `true` if the wake-up was more than 10% of an interval late.
    pub overrun: bool,
    /// Whole intervals skipped because of lateness (Skip policy only).
    pub sweeps_skipped: u64,
}

/// Runtime metrics for the sweep loop.
#[derive(Debug, Clone, Default)]
pub struct SweepMetrics {
    pub total_sweeps: u64,
    pub total_overruns: u64,
    pub total_skipped: u64,
    /// Exponential moving average of sweep execution time (α = 0.1).
    pub avg_sweep_time: Duration,
    pub max_sweep_time: Duration,
    /// Last sweep's execution time as a fraction of the interval.
    pub budget_utilization: f64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Fixed-interval scheduler for the session sweep.
#[derive(Debug)]
pub struct SweepScheduler {
    config: SweepConfig,
    sweep_count: u64,
    /// When the next sweep should fire (Tokio instant for `sleep_until`).
    next_sweep: TokioInstant,
    /// Set by `wait_for_sweep`, consumed by `record_sweep_end`.
    sweep_start: Option<Instant>,
    metrics: SweepMetrics,
}

impl SweepScheduler {
    /// Creates a scheduler whose first sweep fires one interval (plus
    /// jitter) from now.
    pub fn new(config: SweepConfig) -> Self {
        let config = config.validated();

        let jitter = if config.initial_jitter.is_zero() {
            Duration::ZERO
        } else {
            let max_us = config.initial_jitter.as_micros() as u64;
            Duration::from_micros(rand::rng().random_range(0..max_us.max(1)))
        };
        let next_sweep = TokioInstant::now() + config.interval + jitter;

        debug!(
            interval_ms = config.interval.as_millis() as u64,
            policy = ?config.policy,
            "sweep scheduler created"
        );

        Self {
            config,
            sweep_count: 0,
            next_sweep,
            sweep_start: None,
            metrics: SweepMetrics::default(),
        }
    }

    /// Shorthand for a scheduler with default settings and `interval`.
    pub fn every(interval: Duration) -> Self {
        Self::new(SweepConfig::every(interval))
    }

    /// Waits until the next sweep is due. Cancel-safe: dropping the
    /// future before it fires leaves the schedule untouched.
    pub async fn wait_for_sweep(&mut self) -> SweepTick {
        let deadline = self.next_sweep;
        let interval = self.config.interval;
        time::sleep_until(deadline).await;

        let now = TokioInstant::now();
        self.sweep_count += 1;
        self.sweep_start = Some(Instant::now());

        let late_by = now.saturating_duration_since(deadline);
        let overrun = late_by > interval / 10;
        let mut sweeps_skipped = 0u64;

        self.next_sweep = match self.config.policy {
            SweepPolicy::Skip => {
                if overrun {
                    sweeps_skipped = (late_by.as_nanos() / interval.as_nanos()) as u64;
                    if sweeps_skipped > 0 {
                        warn!(
                            sweep = self.sweep_count,
                            skipped = sweeps_skipped,
                            late_ms = late_by.as_secs_f64() * 1000.0,
                            "sweep overrun, skipping ahead"
                        );
                    }
                }
                now + interval
            }
            SweepPolicy::Drop => {
                if overrun {
                    warn!(
                        sweep = self.sweep_count,
                        late_ms = late_by.as_secs_f64() * 1000.0,
                        "sweep overrun, keeping original cadence"
                    );
                }
                deadline + interval
            }
        };

        if overrun {
            self.metrics.total_overruns += 1;
        }
        self.metrics.total_skipped += sweeps_skipped;
        self.metrics.total_sweeps += 1;

        trace!(sweep = self.sweep_count, overrun, "sweep fired");

        SweepTick {
            sweep: self.sweep_count,
            late_by,
            overrun,
            sweeps_skipped,
        }
    }

    /// Records that the work for the current sweep has finished.
    ///
    /// Enables budget warnings and timing metrics; harmless to skip.
    pub fn record_sweep_end(&mut self) {
        let Some(start) = self.sweep_start.take() else {
            return;
        };
        let elapsed = start.elapsed();
        let utilization = elapsed.as_secs_f64() / self.config.interval.as_secs_f64();
        self.metrics.budget_utilization = utilization;

        if utilization >= self.config.budget_warn_threshold {
            warn!(
                sweep = self.sweep_count,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                interval_ms = self.config.interval.as_secs_f64() * 1000.0,
                "sweep is using a large share of its interval"
            );
        }

        if elapsed > self.metrics.max_sweep_time {
            self.metrics.max_sweep_time = elapsed;
        }
        let alpha = 0.1;
        let prev = self.metrics.avg_sweep_time.as_secs_f64();
        self.metrics.avg_sweep_time =
            Duration::from_secs_f64(prev * (1.0 - alpha) + elapsed.as_secs_f64() * alpha);
    }

    /// Number of sweeps fired so far.
    pub fn sweep_count(&self) -> u64 {
        self.sweep_count
    }

    pub fn metrics(&self) -> &SweepMetrics {
        &self.metrics
    }

    /// The (validated) time between sweeps.
    pub fn interval(&self) -> Duration {
        self.config.interval
    }
}
