//! Ramp Scheduling
//!
//! Brings a run from zero to N active sessions and back to zero across
//! three timed phases. Spawn and close pacing both follow the same linear
//! spread contract: the cumulative count tracks `N * t / window` to within
//! one scheduling quantum and never decreases.
//!
//! The controller owns teardown: a rising close watermark during ramp-down,
//! and a hard deadline (`schedule + grace`) past which stragglers are
//! aborted and counted as errors.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::filter::FilterGenerator;
use crate::metrics::MetricsAggregator;
use crate::session::SessionClient;

/// Teardown signal shared with every session
#[derive(Debug, Clone, Copy, Default)]
pub struct Control {
    /// Sessions with spawn index below the watermark close gracefully
    pub close_watermark: u64,
    /// Hard stop: sessions exit immediately, skipping the close handshake
    pub abort: bool,
}

/// Outcome of driving one full ramp schedule
#[derive(Debug, Clone, Copy)]
pub struct RunResult {
    pub sessions_spawned: usize,
    /// Sessions that ignored the abort signal and were torn down from
    /// outside at the deadline
    pub forced_terminations: u64,
}

/// Pacing quantum for both spawn and close scheduling
const SCHEDULE_QUANTUM: Duration = Duration::from_millis(50);
/// Cadence of live progress logs
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);
/// Final window granted to a straggler after the abort signal
const ABORT_WAIT: Duration = Duration::from_millis(500);

/// Cumulative schedule position: how many of `total` sessions should have
/// started (or stopped) `elapsed` into a `window`-long phase.
fn linear_target(total: usize, elapsed: Duration, window: Duration) -> usize {
    if window.is_zero() {
        return total;
    }
    let fraction = elapsed.as_secs_f64() / window.as_secs_f64();
    ((total as f64 * fraction) as usize).min(total)
}

/// Schedules session creation and teardown for one run
pub struct RampController {
    config: Arc<RunConfig>,
    generator: FilterGenerator,
    metrics: Arc<MetricsAggregator>,
}

impl RampController {
    pub fn new(
        config: Arc<RunConfig>,
        generator: FilterGenerator,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        Self {
            config,
            generator,
            metrics,
        }
    }

    /// Drive the full schedule. Blocks until every session task has
    /// confirmed closure or the hard deadline tears it down. Individual
    /// session failures never abort the schedule.
    pub async fn run(&self) -> RunResult {
        let total = self.config.num_clients;
        let ramp_up = Duration::from_secs(self.config.ramp_up_secs);
        let hold = Duration::from_secs(self.config.hold_secs);
        let ramp_down = Duration::from_secs(self.config.ramp_down_secs);

        let (ctrl_tx, ctrl_rx) = watch::channel(Control::default());
        let mut tasks: Vec<JoinHandle<()>> = Vec::with_capacity(total);

        let run_start = Instant::now();

        // ---- Ramp-up: spread spawns evenly across the window ----
        info!(
            clients = total,
            secs = self.config.ramp_up_secs,
            "ramp_up_start"
        );
        let mut spawned = 0usize;
        let mut last_log = Instant::now();
        while spawned < total {
            let target = linear_target(total, run_start.elapsed(), ramp_up);
            while spawned < target {
                let client = SessionClient::new(
                    spawned as u64,
                    Arc::clone(&self.config),
                    self.generator.clone(),
                    Arc::clone(&self.metrics),
                );
                tasks.push(tokio::spawn(client.run(ctrl_rx.clone())));
                spawned += 1;
            }
            sleep(SCHEDULE_QUANTUM).await;
            if last_log.elapsed() >= PROGRESS_INTERVAL {
                info!(
                    spawned,
                    active = self.metrics.active_sessions(),
                    subscribed = self.metrics.subscribe_success_count(),
                    errors = self.metrics.connection_error_count(),
                    "ramp_progress"
                );
                last_log = Instant::now();
            }
        }
        let remaining = ramp_up.saturating_sub(run_start.elapsed());
        if !remaining.is_zero() {
            sleep(remaining).await;
        }
        info!(
            spawned,
            active = self.metrics.active_sessions(),
            "ramp_up_complete"
        );

        // ---- Warmup: sessions up, data-plane metrics discarded ----
        if self.config.warmup_secs > 0 {
            info!(secs = self.config.warmup_secs, "warmup_start");
            self.phase_wait(Duration::from_secs(self.config.warmup_secs), "warmup")
                .await;
        }
        self.metrics.mark_measurement_started();

        // ---- Hold: steady-state measurement ----
        info!(secs = self.config.hold_secs, "hold_start");
        self.phase_wait(hold, "hold").await;

        // ---- Ramp-down: raise the close watermark linearly ----
        info!(secs = self.config.ramp_down_secs, "ramp_down_start");
        let down_start = Instant::now();
        loop {
            let watermark = linear_target(total, down_start.elapsed(), ramp_down) as u64;
            ctrl_tx.send_modify(|c| c.close_watermark = watermark);
            if watermark >= total as u64 {
                break;
            }
            sleep(SCHEDULE_QUANTUM).await;
        }

        // ---- Join: every session must confirm closure by the deadline ----
        let deadline = run_start + self.config.deadline();
        let mut forced = 0u64;
        let mut abort_sent = false;
        for mut task in tasks {
            let left = deadline.saturating_duration_since(Instant::now());
            match timeout(left, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "session_join_error"),
                Err(_) => {
                    if !abort_sent {
                        warn!("run_deadline_reached, aborting remaining sessions");
                        ctrl_tx.send_modify(|c| c.abort = true);
                        abort_sent = true;
                    }
                    if timeout(ABORT_WAIT, &mut task).await.is_err() {
                        task.abort();
                        self.metrics.record_connection_error();
                        forced += 1;
                    }
                }
            }
        }

        info!(
            spawned,
            forced,
            elapsed_secs = run_start.elapsed().as_secs(),
            "ramp_down_complete"
        );
        RunResult {
            sessions_spawned: spawned,
            forced_terminations: forced,
        }
    }

    /// Sit out a fixed-length phase, logging live totals on the way.
    async fn phase_wait(&self, duration: Duration, phase: &'static str) {
        let phase_start = Instant::now();
        let mut last_log = Instant::now();
        loop {
            let left = duration.saturating_sub(phase_start.elapsed());
            if left.is_zero() {
                break;
            }
            sleep(left.min(Duration::from_millis(500))).await;
            if last_log.elapsed() >= PROGRESS_INTERVAL {
                info!(
                    phase,
                    active = self.metrics.active_sessions(),
                    subscribed = self.metrics.subscribe_success_count(),
                    errors = self.metrics.connection_error_count(),
                    messages = self.metrics.messages_seen(),
                    "phase_progress"
                );
                last_log = Instant::now();
            }
        }
    }
}
