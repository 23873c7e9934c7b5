//! Run Metrics Aggregation
//!
//! One `MetricsAggregator` per benchmark run. Sessions only ever touch the
//! atomic increment interface and the append-only latency sample sets, so
//! aggregation stays commutative: arrival order across thousands of
//! sessions carries no meaning. The snapshot is taken once, after every
//! session task has reached a terminal state.
//!
//! Recording path is lock-free for counters; latency appends take a short
//! per-kind mutex. Percentiles are computed at snapshot time from the
//! sorted sample set (nearest-rank), the same method every run.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// Which latency a sample measures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyKind {
    /// Subscribe request to first ack
    SubscribeAck,
    /// Filter replacement request to first ack
    UpdateAck,
    /// Server publish timestamp to client receive
    EndToEnd,
}

/// Thread-safe metrics sink shared by all sessions of one run
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    attempted_connections: AtomicU64,
    active_sessions: AtomicU64,
    subscribe_success: AtomicU64,
    subscribe_failed: AtomicU64,
    connection_errors: AtomicU64,
    update_failures: AtomicU64,
    filter_updates_sent: AtomicU64,
    messages_received: AtomicU64,
    warmup_messages: AtomicU64,
    /// False while warming up; data-plane samples are discarded until the
    /// measurement phase starts. Subscribe accounting is never gated.
    recording: AtomicBool,
    subscribe_samples: Mutex<Vec<u64>>,
    update_samples: Mutex<Vec<u64>>,
    e2e_samples: Mutex<Vec<u64>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// End of warmup: data-plane metrics start counting.
    pub fn mark_measurement_started(&self) {
        self.recording.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_connection_attempt(&self) {
        self.attempted_connections.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_subscribe_success(&self) {
        self.subscribe_success.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_subscribe_failure(&self) {
        self.subscribe_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_update_failure(&self) {
        self.update_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_filter_update_sent(&self) {
        self.filter_updates_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one inbound channel data message. Messages seen before the
    /// measurement phase are tallied separately and excluded from the
    /// summary total.
    #[inline]
    pub fn record_message_received(&self) {
        if self.is_recording() {
            self.messages_received.fetch_add(1, Ordering::Relaxed);
        } else {
            self.warmup_messages.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Append one latency sample in milliseconds. Subscribe-ack samples are
    /// always kept; update-ack and end-to-end samples only during the
    /// measurement phase.
    pub fn record_latency(&self, kind: LatencyKind, millis: u64) {
        match kind {
            LatencyKind::SubscribeAck => self.subscribe_samples.lock().push(millis),
            LatencyKind::UpdateAck => {
                if self.is_recording() {
                    self.update_samples.lock().push(millis);
                }
            }
            LatencyKind::EndToEnd => {
                if self.is_recording() {
                    self.e2e_samples.lock().push(millis);
                }
            }
        }
    }

    #[inline]
    pub fn session_started(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn session_ended(&self) {
        self.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }

    // Live getters for progress logging during a run.

    pub fn active_sessions(&self) -> u64 {
        self.active_sessions.load(Ordering::Relaxed)
    }

    pub fn subscribe_success_count(&self) -> u64 {
        self.subscribe_success.load(Ordering::Relaxed)
    }

    pub fn connection_error_count(&self) -> u64 {
        self.connection_errors.load(Ordering::Relaxed)
    }

    pub fn messages_seen(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
            + self.warmup_messages.load(Ordering::Relaxed)
    }

    /// Final totals and latency statistics. Only meaningful once every
    /// session task has terminated; nothing is mutated here.
    pub fn snapshot(&self) -> Summary {
        Summary {
            completed_at: chrono::Utc::now(),
            attempted_connections: self.attempted_connections.load(Ordering::Acquire),
            subscribe_success: self.subscribe_success.load(Ordering::Acquire),
            subscribe_failed: self.subscribe_failed.load(Ordering::Acquire),
            connection_errors: self.connection_errors.load(Ordering::Acquire),
            update_failures: self.update_failures.load(Ordering::Acquire),
            filter_updates_sent: self.filter_updates_sent.load(Ordering::Acquire),
            messages_received: self.messages_received.load(Ordering::Acquire),
            warmup_messages: self.warmup_messages.load(Ordering::Acquire),
            subscribe_latency: LatencyStats::from_samples(&self.subscribe_samples.lock()),
            update_latency: LatencyStats::from_samples(&self.update_samples.lock()),
            e2e_latency: LatencyStats::from_samples(&self.e2e_samples.lock()),
        }
    }
}

/// Count, mean and tail statistics over one latency sample set (ms)
#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencyStats {
    pub count: u64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub mean_ms: f64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
}

impl LatencyStats {
    /// Sort a copy of the sample set and read nearest-rank percentiles off
    /// it. Sorting makes the result independent of arrival order.
    pub fn from_samples(samples: &[u64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();

        let count = sorted.len() as u64;
        let sum: u64 = sorted.iter().sum();

        Self {
            count,
            min_ms: sorted[0],
            max_ms: sorted[sorted.len() - 1],
            mean_ms: sum as f64 / count as f64,
            p50_ms: nearest_rank(&sorted, 50.0),
            p95_ms: nearest_rank(&sorted, 95.0),
            p99_ms: nearest_rank(&sorted, 99.0),
        }
    }
}

/// Nearest-rank percentile of a sorted sample set.
fn nearest_rank(sorted: &[u64], percentile: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((percentile / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Final report of one benchmark run
#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub completed_at: chrono::DateTime<chrono::Utc>,
    pub attempted_connections: u64,
    pub subscribe_success: u64,
    pub subscribe_failed: u64,
    pub connection_errors: u64,
    pub update_failures: u64,
    pub filter_updates_sent: u64,
    pub messages_received: u64,
    pub warmup_messages: u64,
    pub subscribe_latency: LatencyStats,
    pub update_latency: LatencyStats,
    pub e2e_latency: LatencyStats,
}

impl Summary {
    fn write_latency_block(
        f: &mut std::fmt::Formatter<'_>,
        title: &str,
        stats: &LatencyStats,
    ) -> std::fmt::Result {
        writeln!(f, "{} Latency (ms):", title)?;
        if stats.count == 0 {
            writeln!(f, "  No data")?;
            return Ok(());
        }
        writeln!(f, "  Count:  {}", stats.count)?;
        writeln!(f, "  Min:    {}", stats.min_ms)?;
        writeln!(f, "  Mean:   {:.2}", stats.mean_ms)?;
        writeln!(f, "  p50:    {}", stats.p50_ms)?;
        writeln!(f, "  p95:    {}", stats.p95_ms)?;
        writeln!(f, "  p99:    {}", stats.p99_ms)?;
        writeln!(f, "  Max:    {}", stats.max_ms)?;
        Ok(())
    }
}

impl std::fmt::Display for Summary {
    /// Stable labeled lines; downstream log scrapers key on the label
    /// names, so changing them is a breaking change.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Connection Metrics:")?;
        writeln!(f, "  Subscribe Success:   {}", self.subscribe_success)?;
        writeln!(f, "  Subscribe Failed:    {}", self.subscribe_failed)?;
        writeln!(f, "  Connection Errors:   {}", self.connection_errors)?;
        writeln!(f, "  Update Failures:     {}", self.update_failures)?;
        writeln!(f, "  Filter Updates:      {}", self.filter_updates_sent)?;
        writeln!(f, "  Messages Received:   {}", self.messages_received)?;
        if self.warmup_messages > 0 {
            writeln!(f, "  Warmup Messages:     {}", self.warmup_messages)?;
        }
        writeln!(f)?;
        Self::write_latency_block(f, "Subscribe", &self.subscribe_latency)?;
        writeln!(f)?;
        Self::write_latency_block(f, "Filter Update", &self.update_latency)?;
        writeln!(f)?;
        Self::write_latency_block(f, "End-to-End", &self.e2e_latency)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = MetricsAggregator::new();
        metrics.mark_measurement_started();

        for _ in 0..10 {
            metrics.record_connection_attempt();
        }
        for _ in 0..7 {
            metrics.record_subscribe_success();
        }
        for _ in 0..2 {
            metrics.record_subscribe_failure();
        }
        metrics.record_connection_error();
        for _ in 0..500 {
            metrics.record_message_received();
        }

        let summary = metrics.snapshot();
        assert_eq!(summary.attempted_connections, 10);
        assert_eq!(summary.subscribe_success, 7);
        assert_eq!(summary.subscribe_failed, 2);
        assert_eq!(summary.connection_errors, 1);
        assert_eq!(summary.messages_received, 500);
        // Accounting invariant: resolved subscribes never exceed attempts.
        assert!(summary.subscribe_success + summary.subscribe_failed <= summary.attempted_connections);
    }

    #[test]
    fn test_warmup_gates_data_metrics_only() {
        let metrics = MetricsAggregator::new();

        metrics.record_message_received();
        metrics.record_latency(LatencyKind::UpdateAck, 5);
        metrics.record_latency(LatencyKind::EndToEnd, 9);
        metrics.record_latency(LatencyKind::SubscribeAck, 12);

        metrics.mark_measurement_started();
        metrics.record_message_received();
        metrics.record_latency(LatencyKind::UpdateAck, 6);

        let summary = metrics.snapshot();
        assert_eq!(summary.messages_received, 1);
        assert_eq!(summary.warmup_messages, 1);
        assert_eq!(summary.update_latency.count, 1);
        assert_eq!(summary.e2e_latency.count, 0);
        // Subscribe accounting is never discarded.
        assert_eq!(summary.subscribe_latency.count, 1);
    }

    #[test]
    fn test_percentiles_are_order_independent() {
        let ascending: Vec<u64> = (1..=1000).collect();
        let mut shuffled = ascending.clone();
        // Deterministic shuffle: reverse plus interleave.
        shuffled.reverse();
        shuffled.swap(0, 500);
        shuffled.swap(13, 700);

        let a = LatencyStats::from_samples(&ascending);
        let b = LatencyStats::from_samples(&shuffled);
        assert_eq!(a.p50_ms, b.p50_ms);
        assert_eq!(a.p95_ms, b.p95_ms);
        assert_eq!(a.p99_ms, b.p99_ms);
        assert_eq!(a.mean_ms, b.mean_ms);
    }

    #[test]
    fn test_nearest_rank_known_values() {
        let sorted: Vec<u64> = (1..=100).collect();
        assert_eq!(nearest_rank(&sorted, 50.0), 50);
        assert_eq!(nearest_rank(&sorted, 95.0), 95);
        assert_eq!(nearest_rank(&sorted, 99.0), 99);
        assert_eq!(nearest_rank(&sorted, 100.0), 100);

        let single = [42u64];
        assert_eq!(nearest_rank(&single, 50.0), 42);
        assert_eq!(nearest_rank(&single, 99.0), 42);
    }

    #[test]
    fn test_p99_at_least_p95() {
        let samples: Vec<u64> = (0..517).map(|i| (i * 7) % 903).collect();
        let stats = LatencyStats::from_samples(&samples);
        assert!(stats.p99_ms >= stats.p95_ms);
        assert!(stats.p95_ms >= stats.p50_ms);
        assert!(stats.max_ms >= stats.p99_ms);
    }

    #[test]
    fn test_empty_stats() {
        let stats = LatencyStats::from_samples(&[]);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.p99_ms, 0);
        assert_eq!(stats.mean_ms, 0.0);
    }

    #[test]
    fn test_summary_labels_are_stable() {
        let metrics = MetricsAggregator::new();
        metrics.mark_measurement_started();
        metrics.record_subscribe_success();
        metrics.record_latency(LatencyKind::SubscribeAck, 3);

        let rendered = metrics.snapshot().to_string();
        for label in [
            "Subscribe Success",
            "Subscribe Failed",
            "Connection Errors",
            "Messages Received",
            "Mean:",
            "p95:",
            "p99:",
        ] {
            assert!(rendered.contains(label), "missing label {}", label);
        }
    }
}
