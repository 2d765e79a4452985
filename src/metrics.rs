//! Metrics collection for the audio gateway
//!
//! Thread-safe counters using atomic operations. Tracks requests, cache
//! decisions, admissions, upstream traffic and per-worker placement.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Metrics collector for the gateway
///
/// All operations are thread-safe using atomic operations.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    // Request statistics
    total_requests: AtomicU64,
    bad_requests: AtomicU64,

    // Cache statistics
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_bypasses: AtomicU64,
    cache_errors: AtomicU64,

    // Admission statistics
    admissions_stored: AtomicU64,
    admissions_ignored: AtomicU64,
    admissions_failed: AtomicU64,

    // Upstream statistics
    upstream_requests: AtomicU64,
    upstream_failures: AtomicU64,
    interrupted_relays: AtomicU64,

    // Byte statistics
    bytes_from_origin: AtomicU64,
    bytes_from_cache: AtomicU64,
    bytes_to_client: AtomicU64,

    // Latency statistics (stored as microseconds)
    total_request_duration_us: AtomicU64,

    // Indexed like the worker pool
    worker_requests: Vec<AtomicU64>,
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub bad_requests: u64,

    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_bypasses: u64,
    pub cache_errors: u64,

    pub admissions_stored: u64,
    pub admissions_ignored: u64,
    pub admissions_failed: u64,

    pub upstream_requests: u64,
    pub upstream_failures: u64,
    pub interrupted_relays: u64,

    pub bytes_from_origin: u64,
    pub bytes_from_cache: u64,
    pub bytes_to_client: u64,

    pub total_request_duration_us: u64,

    pub worker_requests: Vec<u64>,
}

impl GatewayMetrics {
    /// Create a new metrics collector for a pool of `worker_count` workers
    pub fn new(worker_count: usize) -> Self {
        GatewayMetrics {
            worker_requests: (0..worker_count).map(|_| AtomicU64::new(0)).collect(),
            ..Default::default()
        }
    }

    /// Record an incoming request
    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request rejected before routing (missing identifier, bad method)
    pub fn record_bad_request(&self) {
        self.bad_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a request that skipped the cache because it carried `Range`
    pub fn record_cache_bypass(&self) {
        self.cache_bypasses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed cache lookup that degraded to a miss
    pub fn record_cache_error(&self) {
        self.cache_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admission_stored(&self) {
        self.admissions_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admission_ignored(&self) {
        self.admissions_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_admission_failed(&self) {
        self.admissions_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an upstream fetch sent to the worker at `worker_index`
    ///
    /// # Arguments
    /// * `worker_index` - Index of the worker in the pool
    /// * `success` - Whether response headers were received
    pub fn record_upstream_request(&self, worker_index: usize, success: bool) {
        self.upstream_requests.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.upstream_failures.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(counter) = self.worker_requests.get(worker_index) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a relay that ended before the body completed
    pub fn record_interrupted_relay(&self) {
        self.interrupted_relays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_from_origin(&self, bytes: u64) {
        self.bytes_from_origin.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_bytes_from_cache(&self, bytes: u64) {
        self.bytes_from_cache.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_bytes_to_client(&self, bytes: u64) {
        self.bytes_to_client.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record time spent until response headers were ready
    pub fn record_request_duration(&self, duration: Duration) {
        self.total_request_duration_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    ///
    /// Fields are loaded independently, so the snapshot may not be perfectly
    /// consistent under concurrent updates.
    pub fn get_stats(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            bad_requests: self.bad_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_bypasses: self.cache_bypasses.load(Ordering::Relaxed),
            cache_errors: self.cache_errors.load(Ordering::Relaxed),
            admissions_stored: self.admissions_stored.load(Ordering::Relaxed),
            admissions_ignored: self.admissions_ignored.load(Ordering::Relaxed),
            admissions_failed: self.admissions_failed.load(Ordering::Relaxed),
            upstream_requests: self.upstream_requests.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            interrupted_relays: self.interrupted_relays.load(Ordering::Relaxed),
            bytes_from_origin: self.bytes_from_origin.load(Ordering::Relaxed),
            bytes_from_cache: self.bytes_from_cache.load(Ordering::Relaxed),
            bytes_to_client: self.bytes_to_client.load(Ordering::Relaxed),
            total_request_duration_us: self.total_request_duration_us.load(Ordering::Relaxed),
            worker_requests: self
                .worker_requests
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
        }
    }
}

impl MetricsSnapshot {
    /// Cache hit rate as a percentage (0.0 to 100.0) over non-bypassed lookups
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            (self.cache_hits as f64 / total as f64) * 100.0
        }
    }

    /// Average time to response headers in milliseconds
    pub fn avg_request_duration_ms(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            (self.total_request_duration_us as f64 / self.total_requests as f64) / 1000.0
        }
    }

    /// Upstream failure rate as a percentage (0.0 to 100.0)
    pub fn upstream_failure_rate(&self) -> f64 {
        if self.upstream_requests == 0 {
            0.0
        } else {
            (self.upstream_failures as f64 / self.upstream_requests as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_record_cache_operations() {
        let metrics = GatewayMetrics::new(1);

        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_cache_bypass();
        metrics.record_cache_error();

        let stats = metrics.get_stats();
        assert_eq!(stats.cache_hits, 2);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.cache_bypasses, 1);
        assert_eq!(stats.cache_errors, 1);
    }

    #[test]
    fn test_record_upstream_per_worker() {
        let metrics = GatewayMetrics::new(3);

        metrics.record_upstream_request(0, true);
        metrics.record_upstream_request(2, true);
        metrics.record_upstream_request(2, false);
        // Out-of-range index only counts toward the totals
        metrics.record_upstream_request(9, true);

        let stats = metrics.get_stats();
        assert_eq!(stats.upstream_requests, 4);
        assert_eq!(stats.upstream_failures, 1);
        assert_eq!(stats.worker_requests, vec![1, 0, 2]);
        assert_eq!(stats.upstream_failure_rate(), 25.0);
    }

    #[test]
    fn test_record_admissions_and_bytes() {
        let metrics = GatewayMetrics::new(1);

        metrics.record_admission_stored();
        metrics.record_admission_ignored();
        metrics.record_admission_failed();
        metrics.record_bytes_from_origin(1000);
        metrics.record_bytes_from_cache(500);
        metrics.record_bytes_to_client(1500);

        let stats = metrics.get_stats();
        assert_eq!(stats.admissions_stored, 1);
        assert_eq!(stats.admissions_ignored, 1);
        assert_eq!(stats.admissions_failed, 1);
        assert_eq!(stats.bytes_from_origin, 1000);
        assert_eq!(stats.bytes_from_cache, 500);
        assert_eq!(stats.bytes_to_client, 1500);
    }

    #[test]
    fn test_cache_hit_rate() {
        let metrics = GatewayMetrics::new(1);
        assert_eq!(metrics.get_stats().cache_hit_rate(), 0.0);

        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        assert_eq!(metrics.get_stats().cache_hit_rate(), 75.0);
    }

    #[test]
    fn test_avg_request_duration() {
        let metrics = GatewayMetrics::new(1);

        metrics.record_request();
        metrics.record_request_duration(Duration::from_millis(100));
        metrics.record_request();
        metrics.record_request_duration(Duration::from_millis(200));

        assert_eq!(metrics.get_stats().avg_request_duration_ms(), 150.0);
    }

    #[test]
    fn test_thread_safety() {
        let metrics = Arc::new(GatewayMetrics::new(2));
        let mut handles = vec![];

        for i in 0..10 {
            let metrics_clone = Arc::clone(&metrics);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    metrics_clone.record_request();
                    metrics_clone.record_upstream_request(i % 2, true);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = metrics.get_stats();
        assert_eq!(stats.total_requests, 1000);
        assert_eq!(stats.worker_requests, vec![500, 500]);
    }
}
