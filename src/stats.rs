//! Shared run counters.
//!
//! `Stats` is a cheap handle; every clone points at the same counters. All
//! mutation goes through atomic read-modify-write operations so concurrent
//! workers never lose updates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use tokio::sync::Mutex;

/// Upper bound for recorded handshake latency, in milliseconds.
const LATENCY_CEILING_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub connected: u64,
    pub errors: u64,
    pub closed: u64,
    pub peak: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub samples: u64,
    pub min: u64,
    pub mean: f64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub max: u64,
}

struct Inner {
    connected: AtomicU64,
    errors: AtomicU64,
    closed: AtomicU64,
    peak: AtomicU64,
    start: OnceLock<Instant>,
    handshake_latency: Mutex<Histogram<u64>>,
}

#[derive(Clone)]
pub struct Stats {
    inner: Arc<Inner>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                connected: AtomicU64::new(0),
                errors: AtomicU64::new(0),
                closed: AtomicU64::new(0),
                peak: AtomicU64::new(0),
                start: OnceLock::new(),
                handshake_latency: Mutex::new(
                    Histogram::<u64>::new_with_bounds(1, LATENCY_CEILING_MS, 3)
                        .expect("constant histogram bounds are valid"),
                ),
            }),
        }
    }

    /// Records the soak start. Only the first call has an effect.
    pub fn mark_start(&self) {
        let _ = self.inner.start.set(Instant::now());
    }

    pub fn increment_connected(&self) {
        let now = self.inner.connected.fetch_add(1, Ordering::AcqRel) + 1;
        self.inner.peak.fetch_max(now, Ordering::AcqRel);
    }

    /// Decrements `connected` unless it is already zero. Returns whether a
    /// decrement happened.
    pub fn decrement_connected(&self) -> bool {
        self.inner
            .connected
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn increment_errors(&self) {
        self.inner.errors.fetch_add(1, Ordering::AcqRel);
    }

    pub fn increment_closed(&self) {
        self.inner.closed.fetch_add(1, Ordering::AcqRel);
    }

    pub fn snapshot(&self) -> Snapshot {
        let connected = self.inner.connected.load(Ordering::Acquire);
        let peak = self
            .inner
            .peak
            .fetch_max(connected, Ordering::AcqRel)
            .max(connected);

        Snapshot {
            connected,
            errors: self.inner.errors.load(Ordering::Acquire),
            closed: self.inner.closed.load(Ordering::Acquire),
            peak,
            elapsed: self
                .inner
                .start
                .get()
                .map(Instant::elapsed)
                .unwrap_or_default(),
        }
    }

    pub async fn record_handshake(&self, latency: Duration) {
        let millis = (latency.as_millis() as u64).clamp(1, LATENCY_CEILING_MS);
        self.inner
            .handshake_latency
            .lock()
            .await
            .record(millis)
            .ok();
    }

    pub async fn handshake_latency(&self) -> Option<LatencySummary> {
        let hist = self.inner.handshake_latency.lock().await;
        if hist.len() == 0 {
            return None;
        }

        Some(LatencySummary {
            samples: hist.len(),
            min: hist.min(),
            mean: hist.mean(),
            p50: hist.value_at_quantile(0.50),
            p95: hist.value_at_quantile(0.95),
            p99: hist.value_at_quantile(0.99),
            max: hist.max(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decrement_never_goes_negative() {
        let stats = Stats::new();
        assert!(!stats.decrement_connected());
        stats.increment_connected();
        assert!(stats.decrement_connected());
        assert!(!stats.decrement_connected());
        assert_eq!(stats.snapshot().connected, 0);
    }

    #[test]
    fn peak_tracks_high_water_mark() {
        let stats = Stats::new();
        let mut last_peak = 0;

        for _ in 0..5 {
            stats.increment_connected();
        }
        for _ in 0..3 {
            stats.decrement_connected();
            let snap = stats.snapshot();
            assert!(snap.peak >= snap.connected);
            assert!(snap.peak >= last_peak);
            last_peak = snap.peak;
        }

        let snap = stats.snapshot();
        assert_eq!(snap.connected, 2);
        assert_eq!(snap.peak, 5);
    }

    #[test]
    fn elapsed_is_zero_until_marked() {
        let stats = Stats::new();
        assert_eq!(stats.snapshot().elapsed, Duration::ZERO);
        stats.mark_start();
        std::thread::sleep(Duration::from_millis(5));
        let first = stats.snapshot().elapsed;
        assert!(first >= Duration::from_millis(5));

        // a second mark does not reset the clock
        stats.mark_start();
        assert!(stats.snapshot().elapsed >= first);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_mutation_loses_no_updates() {
        const TASKS: u64 = 64;
        const ROUNDS: u64 = 1_000;

        let stats = Stats::new();
        let mut handles = Vec::new();

        for task in 0..TASKS {
            let stats = stats.clone();
            handles.push(tokio::spawn(async move {
                for round in 0..ROUNDS {
                    stats.increment_connected();
                    if round % 2 == 0 {
                        stats.increment_errors();
                    }
                    // odd tasks leave one connection open per round
                    if task % 2 == 0 {
                        assert!(stats.decrement_connected());
                    }
                    stats.increment_closed();
                    if round % 100 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.connected, (TASKS / 2) * ROUNDS);
        assert_eq!(snap.errors, TASKS * ROUNDS / 2);
        assert_eq!(snap.closed, TASKS * ROUNDS);
        assert!(snap.peak >= snap.connected);
        assert!(snap.peak <= TASKS * ROUNDS);
    }

    #[tokio::test]
    async fn handshake_latency_summary() {
        let stats = Stats::new();
        assert!(stats.handshake_latency().await.is_none());

        for ms in [5, 10, 20, 40] {
            stats.record_handshake(Duration::from_millis(ms)).await;
        }
        stats.record_handshake(Duration::from_micros(10)).await;

        let summary = stats.handshake_latency().await.unwrap();
        assert_eq!(summary.samples, 5);
        assert_eq!(summary.min, 1);
        assert!(summary.max >= 40);
    }
}
