//! Execution lock: at most one sync body in flight per name.
//!
//! Callers serialize behind the current holder; every caller eventually runs
//! its own body. A failing body releases the lock on the way out and the
//! error propagates only to that caller - the lock carries no poisoned state.
//! (The dedupe flavor of mutual exclusion lives in
//! `mirador_cache::SingleFlight`.)

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Named async mutual exclusion.
#[derive(Clone, Default)]
pub struct ExecutionLock {
    locks: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ExecutionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `body` while holding the lock for `name`.
    pub async fn run<F, T>(&self, name: &str, body: F) -> T
    where
        F: Future<Output = T>,
    {
        let lock = {
            let mut locks = self.locks.lock().expect("lock registry");
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let holder = Uuid::new_v4();
        debug!(name, %holder, "Waiting for execution lock");
        let _guard = lock.lock().await;
        debug!(name, %holder, "Acquired execution lock");

        let out = body.await;
        debug!(name, %holder, "Released execution lock");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_lock_held_intervals_are_disjoint() {
        let lock = ExecutionLock::new();
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let lock = lock.clone();
            let concurrent = concurrent.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                lock.run("sync", async {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                })
                .await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_in_body_does_not_poison() {
        let lock = ExecutionLock::new();

        let failed: Result<(), &str> = lock.run("sync", async { Err("boom") }).await;
        assert!(failed.is_err());

        // Next caller proceeds normally.
        let ok: Result<i32, &str> = lock.run("sync", async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));
    }

    #[tokio::test]
    async fn test_different_names_do_not_contend() {
        let lock = ExecutionLock::new();
        let started = std::time::Instant::now();

        let a = lock.run("a", async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        });
        let b = lock.run("b", async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        });
        tokio::join!(a, b);

        assert!(started.elapsed() < Duration::from_millis(95));
    }
}
