//! Atomically published route state
//!
//! The route snapshot and the index built from it travel together as one
//! [`RouteGeneration`] behind a single atomically swapped reference.
//! Readers load one generation and can therefore never observe a new
//! index paired with an old snapshot or vice versa. Nothing is ever
//! mutated in place; reload replaces the whole generation.
//!
//! Visibility is eventual: a reader may briefly keep resolving against
//! the previous generation after a publish. That window is bounded by the
//! reload path's re-add pass, which re-establishes every wanted kernel
//! route regardless of what a reader saw in the meantime.

use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::route::{Gateways, Route, RouteIndex};

/// One fully-formed configuration generation: the authoritative route
/// snapshot and the lookup index built from exactly that snapshot.
pub struct RouteGeneration {
    pub routes: Vec<Route>,
    pub index: RouteIndex,
}

/// Lock-free holder of the current route generation.
///
/// Any number of threads may call [`lookup`](RouteStore::lookup),
/// [`generation`](RouteStore::generation), and
/// [`snapshot`](RouteStore::snapshot) concurrently with a publisher; none
/// of them block or coordinate.
pub struct RouteStore {
    current: ArcSwap<RouteGeneration>,
}

impl RouteStore {
    /// Create a store holding an empty generation.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RouteGeneration {
                routes: Vec::new(),
                index: RouteIndex::build(&[]),
            }),
        }
    }

    /// Replace the current generation as one unit, returning the
    /// generation it displaced.
    ///
    /// The displaced generation is retained by the caller only long
    /// enough to diff the kernel table against it, then dropped.
    pub fn publish(&self, routes: Vec<Route>, index: RouteIndex) -> Arc<RouteGeneration> {
        self.current.swap(Arc::new(RouteGeneration { routes, index }))
    }

    /// The current snapshot/index pair.
    pub fn generation(&self) -> Arc<RouteGeneration> {
        self.current.load_full()
    }

    /// A clone of the currently configured route set.
    pub fn snapshot(&self) -> Vec<Route> {
        self.current.load().routes.clone()
    }

    /// Gateways for `addr` in the current index, or empty.
    pub fn lookup(&self, addr: IpAddr) -> Gateways {
        self.current.load().index.lookup(addr)
    }
}

impl Default for RouteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::Gateway;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn generation_for(gateway: &str) -> (Vec<Route>, RouteIndex) {
        let routes = vec![Route::new(
            "10.0.0.0/24".parse().unwrap(),
            vec![Gateway::new(gateway.parse().unwrap())],
            true,
        )];
        let index = RouteIndex::build(&routes);
        (routes, index)
    }

    #[test]
    fn test_publish_replaces_and_returns_previous() {
        let store = RouteStore::new();
        assert!(store.snapshot().is_empty());

        let (routes, index) = generation_for("192.168.0.1");
        let displaced = store.publish(routes.clone(), index);
        assert!(displaced.routes.is_empty());

        assert_eq!(store.snapshot(), routes);
        let hit = store.lookup("10.0.0.7".parse().unwrap());
        assert_eq!(hit.as_slice(), &[Gateway::new("192.168.0.1".parse().unwrap())]);

        let (routes2, index2) = generation_for("192.168.0.2");
        let displaced = store.publish(routes2, index2);
        assert_eq!(displaced.routes, routes);
    }

    #[test]
    fn test_lookup_miss_is_empty() {
        let store = RouteStore::new();
        assert!(store.lookup("10.0.0.1".parse().unwrap()).is_empty());
    }

    /// Readers must always see an index that was built from the snapshot
    /// they loaded, even while a publisher keeps swapping generations.
    #[test]
    fn test_generation_pair_is_never_torn() {
        let store = Arc::new(RouteStore::new());
        let stop = Arc::new(AtomicBool::new(false));
        let addr: IpAddr = "10.0.0.7".parse().unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        let generation = store.generation();
                        if generation.routes.is_empty() {
                            assert!(generation.index.lookup(addr).is_empty());
                            continue;
                        }
                        let expected = generation.routes[0].gateways();
                        assert_eq!(generation.index.lookup(addr), expected);
                    }
                })
            })
            .collect();

        for i in 0..2000 {
            let gateway = format!("192.168.0.{}", i % 250 + 1);
            let (routes, index) = generation_for(&gateway);
            store.publish(routes, index);
        }

        stop.store(true, Ordering::Relaxed);
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
