// Property: placement is a pure function of (identifier, pool). Repeated calls
// agree, independent router instances agree, and reordering the pool moves an
// identifier exactly as the stable hash predicts.

use audio_gateway::{canonicalize, PlacementRouter, WorkerPool};
use proptest::prelude::*;

fn pool_of(size: usize) -> Vec<String> {
    (0..size).map(|i| format!("https://worker-{}.example.com", i)).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_route_is_deterministic(name in "[a-zA-Z0-9 ._-]{1,40}", size in 1usize..16) {
        let router = PlacementRouter::new(WorkerPool::new(pool_of(size)).unwrap());
        let id = canonicalize(&name);

        let first = router.route(&id);
        prop_assert!(first.worker_index < size);
        for _ in 0..1000 {
            prop_assert_eq!(&router.route(&id), &first);
        }

        // A second router built from the same pool agrees
        let other = PlacementRouter::new(WorkerPool::new(pool_of(size)).unwrap());
        prop_assert_eq!(other.route(&id), first);
    }

    #[test]
    fn prop_reordered_pool_follows_hash(name in "[a-zA-Z0-9 ._-]{1,40}", size in 2usize..16) {
        let id = canonicalize(&name);
        let workers = pool_of(size);
        let mut reversed = workers.clone();
        reversed.reverse();

        let forward = PlacementRouter::new(WorkerPool::new(workers.clone()).unwrap());
        let backward = PlacementRouter::new(WorkerPool::new(reversed.clone()).unwrap());

        // Same index, different worker behind it
        let index = (PlacementRouter::placement_hash(&id) % size as u64) as usize;
        let a = forward.route(&id);
        let b = backward.route(&id);
        prop_assert_eq!(a.worker_index, index);
        prop_assert_eq!(b.worker_index, index);
        prop_assert_eq!(a.upstream_url, format!("{}/{}", workers[index], id.encoded()));
        prop_assert_eq!(b.upstream_url, format!("{}/{}", reversed[index], id.encoded()));
    }

    #[test]
    fn prop_equivalent_spellings_share_a_worker(
        name in "[a-z]{1,10} [a-z]{1,10}\\.mp3",
        size in 1usize..16,
    ) {
        let router = PlacementRouter::new(WorkerPool::new(pool_of(size)).unwrap());
        let plain = canonicalize(&name);
        let plus = canonicalize(&name.replace(' ', "+"));
        let escaped = canonicalize(&name.replace(' ', "%20"));

        prop_assert_eq!(router.worker_index(&plain), router.worker_index(&plus));
        prop_assert_eq!(router.worker_index(&plain), router.worker_index(&escaped));
    }
}
