//! Per-key request coalescing.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tracing::trace;

use crate::domain::ports::{CacheError, CacheResult};

type SharedResult<T> = Shared<BoxFuture<'static, CacheResult<T>>>;

struct Flight<T> {
    id: u64,
    result: SharedResult<T>,
}

/// Runs at most one computation per key at a time.
///
/// The first caller for a key spawns the computation on the Tokio runtime;
/// callers arriving while it runs await the same result. Spawned work runs
/// to completion even if every caller stops waiting.
pub struct SingleFlight<K, T> {
    flights: Arc<Mutex<HashMap<K, Flight<T>>>>,
    next_id: AtomicU64,
}

impl<K, T> SingleFlight<K, T>
where
    K: Hash + Eq + Clone + std::fmt::Display + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Creates an empty coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Joins the in-flight computation for `key`, or starts one with `make`.
    ///
    /// `make` is only invoked when no flight for `key` is running.
    ///
    /// # Errors
    /// Returns the computation's error, or `TaskFailed` if it panicked.
    pub async fn run<F, Fut>(&self, key: K, make: F) -> CacheResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheResult<T>> + Send + 'static,
    {
        let result = {
            let mut flights = self.flights.lock();
            if let Some(flight) = flights.get(&key) {
                trace!(key = %key, "Joining in-flight load");
                flight.result.clone()
            } else {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let registry = Arc::clone(&self.flights);
                let task_key = key.clone();
                let work = make();

                let task_registry = Arc::clone(&registry);
                let handle = tokio::spawn(async move {
                    let out = work.await;
                    forget(&task_registry, &task_key, id);
                    out
                });

                // The task cannot clean up after a panic, so the first waiter does.
                let waiter_key = key.clone();
                let shared = async move {
                    let out = handle.await.unwrap_or_else(|e| Err(CacheError::from(e)));
                    forget(&registry, &waiter_key, id);
                    out
                }
                .boxed()
                .shared();

                trace!(key = %key, "Starting load");
                flights.insert(
                    key,
                    Flight {
                        id,
                        result: shared.clone(),
                    },
                );
                shared
            }
        };

        result.await
    }

    /// Number of computations currently running.
    pub fn in_flight(&self) -> usize {
        self.flights.lock().len()
    }

    /// Forgets all running computations. They still run to completion, but
    /// new callers start fresh ones.
    pub fn clear(&self) {
        self.flights.lock().clear();
    }
}

/// Drops the registry entry for `key` if it still belongs to flight `id`.
fn forget<K: Hash + Eq, T>(registry: &Mutex<HashMap<K, Flight<T>>>, key: &K, id: u64) {
    let mut flights = registry.lock();
    if flights.get(key).is_some_and(|f| f.id == id) {
        flights.remove(key);
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Hash + Eq + Clone + std::fmt::Display + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> std::fmt::Debug for SingleFlight<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.flights.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_computation() {
        let flights: SingleFlight<String, u32> = SingleFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let run = || {
            let calls = Arc::clone(&calls);
            flights.run("k".to_string(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(7)
            })
        };

        let (a, b, c) = tokio::join!(run(), run(), run());

        assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (7, 7, 7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_errors_are_shared() {
        let flights: SingleFlight<String, u32> = SingleFlight::new();

        let run = || {
            flights.run("k".to_string(), || async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err(CacheError::NetworkError("boom".to_string()))
            })
        };

        let (a, b) = tokio::join!(run(), run());

        assert_eq!(a, Err(CacheError::NetworkError("boom".to_string())));
        assert_eq!(b, a);
    }

    #[tokio::test]
    async fn test_sequential_calls_run_again() {
        let flights: SingleFlight<String, u32> = SingleFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            let out = flights
                .run("k".to_string(), move || async move {
                    Ok(calls.fetch_add(1, Ordering::SeqCst) as u32)
                })
                .await;
            assert!(out.is_ok());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let flights: SingleFlight<String, u32> = SingleFlight::new();
        let (a, b) = tokio::join!(
            flights.run("a".to_string(), || async { Ok(1) }),
            flights.run("b".to_string(), || async { Ok(2) }),
        );
        assert_eq!((a.unwrap(), b.unwrap()), (1, 2));
    }

    #[tokio::test]
    async fn test_panic_becomes_task_failed() {
        let flights: SingleFlight<String, u32> = SingleFlight::new();
        fn exploding() -> CacheResult<u32> {
            panic!("decoder exploded")
        }

        let out = flights
            .run("k".to_string(), || async { exploding() })
            .await;
        assert!(matches!(out, Err(CacheError::TaskFailed(_))));
        assert_eq!(flights.in_flight(), 0);

        // A later call starts a fresh computation.
        let out = flights.run("k".to_string(), || async { Ok(3) }).await;
        assert_eq!(out, Ok(3));
    }
}
