//! Single-flight coordination for expensive idempotent operations.
//!
//! At most one execution of an operation runs per coordinator; callers that
//! arrive while one is in flight await the shared handle and observe the
//! same result. The handle is cleared exactly once, under the coordinating
//! lock, so a clear-then-restart sequence can never race into two
//! concurrent runs.

use futures::future::{BoxFuture, FutureExt, Shared};
use postern_core::Result;
use std::future::Future;
use tokio::sync::Mutex;

type SharedOp<T> = Shared<BoxFuture<'static, Result<T>>>;

/// Deduplicates concurrent invocations of one async operation.
pub struct SingleFlight<T: Clone + Send + Sync + 'static> {
    in_flight: Mutex<Option<SharedOp<T>>>,
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    /// Create a coordinator with no operation in flight.
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(None),
        }
    }

    /// Whether an operation is currently in flight.
    pub async fn is_in_flight(&self) -> bool {
        self.in_flight.lock().await.is_some()
    }

    /// Run `operation`, or join the one already in flight.
    ///
    /// `operation` is only invoked when no operation is running; followers
    /// never execute their closure. Every caller observes the leader's
    /// result, success or failure alike.
    pub async fn run<F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let handle = {
            let mut guard = self.in_flight.lock().await;
            match guard.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let shared = operation().boxed().shared();
                    *guard = Some(shared.clone());
                    shared
                }
            }
        };

        let result = handle.clone().await;

        // Clear the handle exactly once. Pointer equality guards against a
        // newer operation that may already occupy the slot by the time a
        // slow follower wakes up.
        let mut guard = self.in_flight.lock().await;
        if guard.as_ref().is_some_and(|current| current.ptr_eq(&handle)) {
            *guard = None;
        }

        result
    }
}

impl<T: Clone + Send + Sync + 'static> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postern_core::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let flight = Arc::new(SingleFlight::<u32>::new());
        let executions = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let flight = Arc::clone(&flight);
            let executions = Arc::clone(&executions);
            handles.push(tokio::spawn(async move {
                flight
                    .run(move || async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(42)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
        assert!(!flight.is_in_flight().await);
    }

    #[tokio::test]
    async fn followers_observe_the_leaders_error() {
        let flight = Arc::new(SingleFlight::<u32>::new());
        let executions = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let flight = Arc::clone(&flight);
            let executions = Arc::clone(&executions);
            handles.push(tokio::spawn(async move {
                flight
                    .run(move || async move {
                        executions.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Err::<u32, _>(Error::device_trust("ceremony failed"))
                    })
                    .await
            }));
        }

        for handle in handles {
            let err = handle.await.unwrap().unwrap_err();
            assert!(matches!(err, Error::DeviceTrust { .. }));
        }
        assert_eq!(executions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn completed_operation_allows_a_fresh_run() {
        let flight = SingleFlight::<u32>::new();
        let first = flight.run(|| async { Ok(1) }).await.unwrap();
        let second = flight.run(|| async { Ok(2) }).await.unwrap();
        assert_eq!((first, second), (1, 2));
    }
}
