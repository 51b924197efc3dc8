//! Block Store Metrics
//!
//! Counters for cache effectiveness and backend traffic of one `BlockStore`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Block store metrics collector
#[derive(Debug, Default)]
pub struct StoreMetrics {
    // Read cache
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    negative_hits: AtomicU64,

    // Backend traffic
    containers_stored: AtomicU64,
    containers_fetched: AtomicU64,
    backend_failures: AtomicU64,
    flushes: AtomicU64,

    // Fetch latency (microseconds, exponential moving average)
    fetch_latency_us: AtomicU64,
}

impl StoreMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_negative_hit(&self) {
        self.negative_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_container_stored(&self) {
        self.containers_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_container_fetched(&self, duration: Duration) {
        self.containers_fetched.fetch_add(1, Ordering::Relaxed);
        self.update_latency_ema(duration);
    }

    pub fn record_backend_failure(&self) {
        self.backend_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    fn update_latency_ema(&self, duration: Duration) {
        let new_us = duration.as_micros() as u64;
        let alpha = 0.1;

        loop {
            let current = self.fetch_latency_us.load(Ordering::Relaxed);
            let updated = if current == 0 {
                new_us
            } else {
                ((1.0 - alpha) * current as f64 + alpha * new_us as f64) as u64
            };

            if self
                .fetch_latency_us
                .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn negative_hits(&self) -> u64 {
        self.negative_hits.load(Ordering::Relaxed)
    }

    pub fn containers_stored(&self) -> u64 {
        self.containers_stored.load(Ordering::Relaxed)
    }

    pub fn containers_fetched(&self) -> u64 {
        self.containers_fetched.load(Ordering::Relaxed)
    }

    pub fn backend_failures(&self) -> u64 {
        self.backend_failures.load(Ordering::Relaxed)
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn fetch_latency(&self) -> Duration {
        Duration::from_micros(self.fetch_latency_us.load(Ordering::Relaxed))
    }

    /// Share of container lookups answered by the LRU cache
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.cache_hits() as f64;
        let total = hits + self.cache_misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits(),
            cache_misses: self.cache_misses(),
            negative_hits: self.negative_hits(),
            hit_ratio: self.hit_ratio(),
            containers_stored: self.containers_stored(),
            containers_fetched: self.containers_fetched(),
            backend_failures: self.backend_failures(),
            flushes: self.flushes(),
            fetch_latency: self.fetch_latency(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.cache_hits.store(0, Ordering::Relaxed);
        self.cache_misses.store(0, Ordering::Relaxed);
        self.negative_hits.store(0, Ordering::Relaxed);
        self.containers_stored.store(0, Ordering::Relaxed);
        self.containers_fetched.store(0, Ordering::Relaxed);
        self.backend_failures.store(0, Ordering::Relaxed);
        self.flushes.store(0, Ordering::Relaxed);
        self.fetch_latency_us.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of all store metrics
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub negative_hits: u64,
    pub hit_ratio: f64,
    pub containers_stored: u64,
    pub containers_fetched: u64,
    pub backend_failures: u64,
    pub flushes: u64,
    pub fetch_latency: Duration,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "cache: {} hits, {} misses, {} negative hits ({:.1}% hit ratio)",
            self.cache_hits,
            self.cache_misses,
            self.negative_hits,
            self.hit_ratio * 100.0
        )?;
        writeln!(
            f,
            "containers: {} stored, {} fetched ({:?} avg fetch)",
            self.containers_stored, self.containers_fetched, self.fetch_latency
        )?;
        write!(
            f,
            "backend failures: {}, flushes: {}",
            self.backend_failures, self.flushes
        )
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_tracking() {
        let metrics = StoreMetrics::new();
        assert_eq!(metrics.hit_ratio(), 0.0);

        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_negative_hit();

        assert_eq!(metrics.cache_hits(), 2);
        assert_eq!(metrics.cache_misses(), 1);
        assert_eq!(metrics.negative_hits(), 1);
        assert!((metrics.hit_ratio() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_fetch_latency_ema() {
        let metrics = StoreMetrics::new();
        metrics.record_container_fetched(Duration::from_micros(100));
        assert_eq!(metrics.fetch_latency(), Duration::from_micros(100));

        metrics.record_container_fetched(Duration::from_micros(200));
        let latency = metrics.fetch_latency().as_micros();
        assert!(latency > 100 && latency < 200);
        assert_eq!(metrics.containers_fetched(), 2);
    }

    #[test]
    fn test_snapshot_and_reset() {
        let metrics = StoreMetrics::new();
        metrics.record_container_stored();
        metrics.record_backend_failure();
        metrics.record_flush();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.containers_stored, 1);
        assert_eq!(snapshot.backend_failures, 1);
        assert_eq!(snapshot.flushes, 1);
        assert!(snapshot.to_string().contains("flushes: 1"));

        metrics.reset();
        assert_eq!(metrics.snapshot().containers_stored, 0);
    }
}
