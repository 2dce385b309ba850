//! Rotation background worker.
//!
//! Runs one rotation cycle per period until shutdown is signaled. The period
//! is measured start-to-start: a slow cycle eats into the wait rather than
//! adding to it, and an overrunning cycle delays the next tick instead of
//! triggering a burst.

use std::time::Duration;

use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{error, info, instrument, warn};

use crate::cycle::{CycleError, RotationCycle};

/// Counters kept across cycles.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    pub cycles_run: u64,
    pub cycles_failed: u64,
    pub consecutive_failures: u64,
}

/// Worker that runs the rotation loop.
pub struct RotationWorker {
    cycle: RotationCycle,
    period: Duration,
    once: bool,
}

impl RotationWorker {
    /// Create a new rotation worker.
    pub fn new(cycle: RotationCycle, period: Duration) -> Self {
        Self {
            cycle,
            period,
            once: false,
        }
    }

    /// Stop after the first cycle.
    pub fn once(mut self, once: bool) -> Self {
        self.once = once;
        self
    }

    /// Run until shutdown is signaled (or after one cycle in `once` mode).
    ///
    /// A cycle that has started always runs to completion before shutdown is
    /// observed.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerStats {
        info!(
            period_secs = self.period.as_secs(),
            once = self.once,
            "Starting rotation worker"
        );

        let mut stats = WorkerStats::default();
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                // Shutdown wins over a tick that came due during the last cycle.
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Rotation worker shutting down");
                        break;
                    }
                }
                // First tick completes immediately: rotate at startup.
                _ = interval.tick() => {
                    self.run_cycle(&mut stats).await;
                    if self.once {
                        break;
                    }
                }
            }
        }

        info!(
            cycles_run = stats.cycles_run,
            cycles_failed = stats.cycles_failed,
            "Rotation worker stopped"
        );
        stats
    }

    async fn run_cycle(&self, stats: &mut WorkerStats) {
        stats.cycles_run += 1;
        let cycle = stats.cycles_run;
        info!(cycle, "Rotation cycle started");

        match self.cycle.run(cycle).await {
            Ok(report) => {
                if stats.consecutive_failures > 0 {
                    info!(
                        cycle,
                        recovered_after = stats.consecutive_failures,
                        "Rotation recovered"
                    );
                }
                stats.consecutive_failures = 0;

                info!(
                    cycle,
                    previous_active = report.previous_active.as_ref().map(|id| id.as_str()),
                    next_active = %report.next_active,
                    candidate_count = report.candidate_count,
                    rows_published = report.rows_published,
                    marker_version = report.marker_version,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Rotation cycle complete"
                );
            }
            Err(e) => {
                stats.cycles_failed += 1;
                stats.consecutive_failures += 1;
                log_failure(cycle, stats.consecutive_failures, &e);
            }
        }
    }
}

fn log_failure(cycle: u64, consecutive_failures: u64, err: &CycleError) {
    match err {
        // Expected between rush events; nothing is wrong with the plumbing.
        CycleError::EmptyCandidateSet => warn!(
            cycle,
            phase = %err.phase(),
            consecutive_failures,
            "Rotation cycle skipped: no candidates"
        ),
        CycleError::PublishUnavailable(_) => error!(
            cycle,
            phase = %err.phase(),
            error = %err,
            consecutive_failures,
            "Rotation cycle failed after marker was persisted; sheet is stale until next cycle"
        ),
        _ => error!(
            cycle,
            phase = %err.phase(),
            error = %err,
            consecutive_failures,
            "Rotation cycle failed"
        ),
    }
}
