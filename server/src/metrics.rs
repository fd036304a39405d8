use serde::Serialize;
use slotfloor_execution::PersistenceSnapshot;
use slotfloor_types::Outcome;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const LATENCY_BUCKET_COUNT: usize = 12;
const LATENCY_BUCKETS_MS: [u64; LATENCY_BUCKET_COUNT] =
    [1, 2, 5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];

#[derive(Clone, Debug, Serialize)]
pub struct LatencySnapshot {
    pub buckets_ms: Vec<u64>,
    pub counts: Vec<u64>,
    pub overflow: u64,
    pub count: u64,
    pub avg_ms: f64,
    pub max_ms: u64,
}

#[derive(Default)]
struct LatencyMetrics {
    buckets: [AtomicU64; LATENCY_BUCKET_COUNT],
    overflow: AtomicU64,
    count: AtomicU64,
    total_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl LatencyMetrics {
    fn record(&self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_ms.fetch_add(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);
        match LATENCY_BUCKETS_MS.iter().position(|bucket| ms <= *bucket) {
            Some(idx) => self.buckets[idx].fetch_add(1, Ordering::Relaxed),
            None => self.overflow.fetch_add(1, Ordering::Relaxed),
        };
    }

    fn snapshot(&self) -> LatencySnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total_ms = self.total_ms.load(Ordering::Relaxed);
        let avg_ms = if count > 0 {
            total_ms as f64 / count as f64
        } else {
            0.0
        };
        LatencySnapshot {
            buckets_ms: LATENCY_BUCKETS_MS.to_vec(),
            counts: self
                .buckets
                .iter()
                .map(|bucket| bucket.load(Ordering::Relaxed))
                .collect(),
            overflow: self.overflow.load(Ordering::Relaxed),
            count,
            avg_ms,
            max_ms: self.max_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct HttpMetricsSnapshot {
    pub play: LatencySnapshot,
    pub history: LatencySnapshot,
    pub stats: LatencySnapshot,
    pub outcomes: BTreeMap<&'static str, u64>,
    pub play_errors: u64,
    pub reject_unauthorized: u64,
    pub reject_body_limit: u64,
    pub reject_rate_limit: u64,
}

#[derive(Default)]
pub struct HttpMetrics {
    play: LatencyMetrics,
    history: LatencyMetrics,
    stats: LatencyMetrics,
    outcomes: [AtomicU64; Outcome::ALL.len()],
    play_errors: AtomicU64,
    reject_unauthorized: AtomicU64,
    reject_body_limit: AtomicU64,
    reject_rate_limit: AtomicU64,
}

impl HttpMetrics {
    pub fn record_play(&self, duration: Duration, outcome: Option<Outcome>) {
        self.play.record(duration);
        match outcome {
            Some(outcome) => self.outcomes[outcome as usize].fetch_add(1, Ordering::Relaxed),
            None => self.play_errors.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn record_history(&self, duration: Duration) {
        self.history.record(duration);
    }

    pub fn record_stats(&self, duration: Duration) {
        self.stats.record(duration);
    }

    pub fn inc_reject_unauthorized(&self) {
        self.reject_unauthorized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reject_body_limit(&self) {
        self.reject_body_limit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reject_rate_limit(&self) {
        self.reject_rate_limit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HttpMetricsSnapshot {
        HttpMetricsSnapshot {
            play: self.play.snapshot(),
            history: self.history.snapshot(),
            stats: self.stats.snapshot(),
            outcomes: Outcome::ALL
                .iter()
                .map(|outcome| {
                    (
                        outcome.label(),
                        self.outcomes[*outcome as usize].load(Ordering::Relaxed),
                    )
                })
                .collect(),
            play_errors: self.play_errors.load(Ordering::Relaxed),
            reject_unauthorized: self.reject_unauthorized.load(Ordering::Relaxed),
            reject_body_limit: self.reject_body_limit.load(Ordering::Relaxed),
            reject_rate_limit: self.reject_rate_limit.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize)]
pub struct WsMetricsSnapshot {
    pub connections: u64,
    pub lagged: u64,
    pub queue_full: u64,
    pub send_errors: u64,
    pub send_timeouts: u64,
}

#[derive(Default)]
pub struct WsMetrics {
    connections: AtomicU64,
    lagged: AtomicU64,
    queue_full: AtomicU64,
    send_errors: AtomicU64,
    send_timeouts: AtomicU64,
}

impl WsMetrics {
    pub fn inc_connections(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_connections(&self) {
        // Saturating; a stray decrement must not wrap.
        let _ = self
            .connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                current.checked_sub(1)
            });
    }

    pub fn add_lagged(&self, skipped: u64) {
        self.lagged.fetch_add(skipped, Ordering::Relaxed);
    }

    pub fn inc_queue_full(&self) {
        self.queue_full.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_send_timeout(&self) {
        self.send_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WsMetricsSnapshot {
        WsMetricsSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            lagged: self.lagged.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            send_timeouts: self.send_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Everything served by `/metrics/http`.
#[derive(Clone, Debug, Serialize)]
pub struct MetricsSnapshot {
    pub http: HttpMetricsSnapshot,
    pub ws: WsMetricsSnapshot,
    pub persistence: PersistenceSnapshot,
    pub invariant_violations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_lands_in_first_fitting_bucket() {
        let metrics = LatencyMetrics::default();
        metrics.record(Duration::from_millis(3));
        metrics.record(Duration::from_millis(5));
        metrics.record(Duration::from_secs(10));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.counts[2], 2);
        assert_eq!(snapshot.overflow, 1);
        assert_eq!(snapshot.count, 3);
        assert_eq!(snapshot.max_ms, 10_000);
    }

    #[test]
    fn outcomes_are_counted_by_label() {
        let metrics = HttpMetrics::default();
        metrics.record_play(Duration::from_millis(1), Some(Outcome::Bell));
        metrics.record_play(Duration::from_millis(1), Some(Outcome::Bell));
        metrics.record_play(Duration::from_millis(1), None);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.outcomes["BELL"], 2);
        assert_eq!(snapshot.outcomes["MISS"], 0);
        assert_eq!(snapshot.play_errors, 1);
        assert_eq!(snapshot.play.count, 3);
    }

    #[test]
    fn connection_gauge_never_wraps() {
        let metrics = WsMetrics::default();
        metrics.dec_connections();
        metrics.inc_connections();
        assert_eq!(metrics.snapshot().connections, 1);
    }
}
