//! Single-flight deduplication: concurrent identical requests collapse onto
//! one execution and all callers receive the same outcome.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// An explicit in-flight-request registry: one shared future per key, cleared
/// unconditionally when the execution completes.
pub struct SingleFlight<T: Clone> {
    inflight: Arc<Mutex<HashMap<String, Shared<BoxFuture<'static, T>>>>>,
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    /// Run `make()` under `key`, or join an execution already in flight.
    ///
    /// The first caller becomes the leader and owns cleanup; late callers
    /// await the leader's shared future and reuse its outcome.
    pub async fn run<F, Fut>(&self, key: &str, make: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (future, leader) = {
            let mut inflight = self.inflight.lock().expect("single-flight registry");
            match inflight.get(key) {
                Some(existing) => {
                    debug!(key, "Joining in-flight execution");
                    (existing.clone(), false)
                }
                None => {
                    let shared = make().boxed().shared();
                    inflight.insert(key.to_string(), shared.clone());
                    (shared, true)
                }
            }
        };

        let outcome = future.await;

        if leader {
            self.inflight
                .lock()
                .expect("single-flight registry")
                .remove(key);
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_execution() {
        let flight = Arc::new(SingleFlight::<usize>::new());
        let executions = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = flight.clone();
            let executions = executions.clone();
            handles.push(tokio::spawn(async move {
                flight
                    .run("refresh", move || async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        42
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_registry_cleared_after_completion() {
        let flight = SingleFlight::<usize>::new();

        let first = flight.run("key", || async { 1 }).await;
        // A later caller must trigger a fresh execution, not a cached value.
        let second = flight.run("key", || async { 2 }).await;

        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }
}
