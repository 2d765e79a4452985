//! Deterministic placement of identifiers on the origin worker pool

use crate::error::{GatewayError, Result};
use crate::models::{CanonicalId, RoutingDecision};
use tracing::debug;
use xxhash_rust::xxh3::xxh3_64;

/// Ordered, immutable list of origin worker base URLs
///
/// The order is part of the placement function and never changes after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPool {
    workers: Vec<String>,
}

impl WorkerPool {
    /// Create a pool from worker base URLs
    ///
    /// Trailing slashes are stripped so `<base>/<id>` never contains `//`.
    ///
    /// # Returns
    /// * `Err(GatewayError::ConfigError)` if `workers` is empty
    pub fn new<I, S>(workers: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let workers: Vec<String> = workers
            .into_iter()
            .map(|w| w.into().trim_end_matches('/').to_string())
            .collect();

        if workers.is_empty() {
            return Err(GatewayError::ConfigError(
                "worker pool must not be empty".to_string(),
            ));
        }

        Ok(WorkerPool { workers })
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    // A constructed pool is never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Base URL of the worker at `index`
    pub fn get(&self, index: usize) -> Option<&str> {
        self.workers.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.workers.iter().map(String::as_str)
    }
}

/// Maps canonical identifiers to workers
#[derive(Debug, Clone)]
pub struct PlacementRouter {
    pool: WorkerPool,
}

impl PlacementRouter {
    /// Create a router over a fixed pool
    pub fn new(pool: WorkerPool) -> Self {
        PlacementRouter { pool }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Stable 64-bit placement hash of an identifier
    ///
    /// XXH3 without a seed: identical across processes, hosts and restarts.
    pub fn placement_hash(id: &CanonicalId) -> u64 {
        xxh3_64(id.decoded().as_bytes())
    }

    /// Index of the worker owning `id`
    pub fn worker_index(&self, id: &CanonicalId) -> usize {
        (Self::placement_hash(id) % self.pool.len() as u64) as usize
    }

    /// Route an identifier to its worker
    pub fn route(&self, id: &CanonicalId) -> RoutingDecision {
        let worker_index = self.worker_index(id);
        let base = &self.pool.workers[worker_index];
        let upstream_url = format!("{}/{}", base, id.encoded());

        debug!(
            "Routed {} to worker {} ({})",
            id, worker_index, upstream_url
        );

        RoutingDecision {
            identifier: id.clone(),
            worker_index,
            upstream_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::canonicalize;

    fn pool(n: usize) -> WorkerPool {
        WorkerPool::new((0..n).map(|i| format!("https://w{}.example.com", i))).unwrap()
    }

    #[test]
    fn test_empty_pool_rejected() {
        let result = WorkerPool::new(Vec::<String>::new());
        assert!(matches!(result, Err(GatewayError::ConfigError(_))));
    }

    #[test]
    fn test_trailing_slash_stripped() {
        let pool = WorkerPool::new(["https://w.example.com/"]).unwrap();
        let router = PlacementRouter::new(pool);
        let decision = router.route(&canonicalize("a.mp3"));
        assert_eq!(decision.upstream_url, "https://w.example.com/a.mp3");
    }

    #[test]
    fn test_single_worker_pool() {
        let router = PlacementRouter::new(pool(1));
        for name in ["a", "b", "c", "track 1.mp3"] {
            assert_eq!(router.route(&canonicalize(name)).worker_index, 0);
        }
    }

    #[test]
    fn test_upstream_url_uses_encoded_id() {
        let router = PlacementRouter::new(pool(1));
        let decision = router.route(&canonicalize("track%201.mp3"));
        assert_eq!(decision.upstream_url, "https://w0.example.com/track%201.mp3");
        assert_eq!(decision.identifier.decoded(), "track 1.mp3");
    }

    #[test]
    fn test_index_is_hash_mod_len() {
        let router = PlacementRouter::new(pool(7));
        let id = canonicalize("track 1.mp3");
        let expected = (xxh3_64(b"track 1.mp3") % 7) as usize;
        assert_eq!(router.worker_index(&id), expected);
    }

    #[test]
    fn test_repeated_routing_is_stable() {
        let router = PlacementRouter::new(pool(5));
        let id = canonicalize("stable.mp3");
        let first = router.route(&id);
        for _ in 0..1000 {
            assert_eq!(router.route(&id), first);
        }
    }

    #[test]
    fn test_spread_over_pool() {
        let router = PlacementRouter::new(pool(4));
        let mut counts = [0usize; 4];
        for i in 0..4000 {
            counts[router.worker_index(&canonicalize(&format!("track-{}.mp3", i)))] += 1;
        }
        for count in counts {
            assert!(count > 800, "uneven spread: {:?}", counts);
        }
    }
}
