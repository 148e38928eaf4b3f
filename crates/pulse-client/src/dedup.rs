//! In-flight request de-duplication (§4.6).
//!
//! While a query for a given cache key is pending, a second identical query (with `dedupe: true`)
//! is handed the same in-flight future instead of triggering a second dispatch. The entry is
//! removed as soon as the shared future settles, whether it succeeds or fails, so the next
//! execution starts a fresh request.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;

use futures::future::{LocalBoxFuture, Shared};
use futures::FutureExt;

use crate::error::PulseError;

type DedupFuture<V> = Shared<LocalBoxFuture<'static, Result<Rc<V>, Rc<PulseError>>>>;

/// A per-client map from cache key to the in-flight future currently producing that key's value.
///
/// Not `Send`/`Sync`: dedup state, like everything else in this crate, lives on a single
/// cooperative executor thread alongside the reactive root it publishes results into.
pub struct DedupMap<V> {
    inflight: Rc<RefCell<HashMap<String, DedupFuture<V>>>>,
}

impl<V> Default for DedupMap<V> {
    fn default() -> Self {
        DedupMap {
            inflight: Rc::new(RefCell::new(HashMap::new())),
        }
    }
}

impl<V> Clone for DedupMap<V> {
    fn clone(&self) -> Self {
        DedupMap {
            inflight: self.inflight.clone(),
        }
    }
}

impl<V: 'static> DedupMap<V> {
    /// Creates an empty dedup map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the in-flight future for `key` if one is already running.
    pub fn get(&self, key: &str) -> Option<DedupFuture<V>> {
        self.inflight.borrow().get(key).cloned()
    }

    /// Registers `fut` as the in-flight operation for `key` and returns a shared, clonable handle
    /// to it. The entry is removed from the map the moment the future settles (success or
    /// failure), so a later execution for the same key always starts fresh.
    pub fn register(
        &self,
        key: String,
        fut: impl Future<Output = Result<Rc<V>, Rc<PulseError>>> + 'static,
    ) -> DedupFuture<V> {
        let map = self.inflight.clone();
        let settle_key = key.clone();
        let shared = async move {
            let result = fut.await;
            map.borrow_mut().remove(&settle_key);
            result
        }
        .boxed_local()
        .shared();
        self.inflight.borrow_mut().insert(key, shared.clone());
        shared
    }

    /// The number of keys currently in flight.
    pub fn len(&self) -> usize {
        self.inflight.borrow().len()
    }

    /// Whether any key is currently in flight.
    pub fn is_empty(&self) -> bool {
        self.inflight.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test(flavor = "current_thread")]
    async fn second_call_reuses_the_first_future() {
        let dedup = DedupMap::<i32>::new();
        let dispatch_count = Rc::new(Cell::new(0));

        let count = dispatch_count.clone();
        let first = dedup.register("k".to_string(), async move {
            count.set(count.get() + 1);
            Ok::<_, Rc<PulseError>>(Rc::new(42))
        });

        // A second, identical call observes the same in-flight future instead of dispatching.
        let second = dedup.get("k").expect("should be in flight");

        let (a, b) = futures::join!(first, second);
        assert_eq!(*a.unwrap(), 42);
        assert_eq!(*b.unwrap(), 42);
        assert_eq!(dispatch_count.get(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn entry_is_removed_once_settled() {
        let dedup = DedupMap::<i32>::new();
        let fut = dedup.register("k".to_string(), async { Ok::<_, Rc<PulseError>>(Rc::new(1)) });
        assert_eq!(dedup.len(), 1);
        fut.await.unwrap();
        assert_eq!(dedup.len(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn entry_is_removed_on_failure_too() {
        let dedup = DedupMap::<i32>::new();
        let fut = dedup.register("k".to_string(), async {
            Err::<Rc<i32>, _>(Rc::new(PulseError::Timeout))
        });
        assert!(fut.await.is_err());
        assert_eq!(dedup.len(), 0);
    }
}
