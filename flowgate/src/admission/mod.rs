//! Admission pool: bounded permits gating a shared external capability.
//!
//! The pool models the concurrency budget of a scarce resource (for example
//! a rate-limited inference backend). Stage executors acquire exactly one
//! [`Permit`] per work attempt and hold it only for the duration of the work
//! call; scheduling itself is never throttled by the pool, so a stage that is
//! launched but waiting for admission is a normal, observable state.

use crate::cancellation::CancellationToken;
use crate::errors::CancelledError;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Permit capacity used when a pipeline does not configure one.
pub const DEFAULT_ADMISSION_CAPACITY: usize = 4;

/// A bounded pool of admission permits shared by all executors of a run.
///
/// Capacity is fixed at construction. The pool is handed to each executor as
/// an explicit `Arc` handle, so tests can substitute a pool of their own and
/// several pipelines can share one budget.
#[derive(Debug)]
pub struct AdmissionPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionPool {
    /// Creates a pool with `capacity` permits.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero; a zero-width pool could never admit any
    /// work. `PipelineBuilder` rejects a zero capacity before reaching here.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "admission capacity must be at least 1");
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Waits for a free permit or for cancellation, whichever comes first.
    ///
    /// Returns the permit on success; the permit returns itself to the pool
    /// when dropped, on every exit path. A cancelled token short-circuits
    /// even when permits are free.
    ///
    /// # Errors
    ///
    /// Returns [`CancelledError`] when the token is cancelled before or
    /// during the wait.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Permit, CancelledError> {
        if cancel.is_cancelled() {
            return Err(cancel.as_error());
        }
        tokio::select! {
            acquired = Arc::clone(&self.semaphore).acquire_owned() => {
                match acquired {
                    Ok(inner) => {
                        debug!(available = self.semaphore.available_permits(), "admission permit granted");
                        Ok(Permit { _inner: inner })
                    }
                    // The semaphore is never closed; acquire_owned only
                    // fails on a closed semaphore.
                    Err(_) => Err(CancelledError::with_reason("admission pool closed")),
                }
            }
            () = cancel.cancelled() => Err(cancel.as_error()),
        }
    }

    /// The fixed number of permits this pool was created with.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of permits currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// An admission permit held for the duration of one work attempt.
///
/// Dropping the permit returns it to the pool immediately.
#[derive(Debug)]
pub struct Permit {
    _inner: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn test_acquire_and_release_accounting() {
        let pool = AdmissionPool::new(2);
        let cancel = CancellationToken::new();

        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.available(), 2);

        let first = pool.acquire(&cancel).await.unwrap();
        let second = pool.acquire(&cancel).await.unwrap();
        assert_eq!(pool.available(), 0);

        drop(first);
        assert_eq!(pool.available(), 1);

        drop(second);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_acquire_pends_at_capacity_and_wakes_on_release() {
        let pool = AdmissionPool::new(1);
        let cancel = CancellationToken::new();

        let held = tokio_test::block_on(pool.acquire(&cancel)).unwrap();

        let mut waiting = task::spawn(pool.acquire(&cancel));
        assert_pending!(waiting.poll());

        drop(held);
        assert!(waiting.is_woken());
        let acquired = assert_ready!(waiting.poll());
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_unblocks_waiting_acquire() {
        let pool = Arc::new(AdmissionPool::new(1));
        let cancel = Arc::new(CancellationToken::new());

        let held = pool.acquire(&cancel).await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            let cancel = Arc::clone(&cancel);
            tokio::spawn(async move { pool.acquire(&cancel).await })
        };

        tokio::task::yield_now().await;
        cancel.cancel("shutdown");

        let outcome = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        let err = outcome.unwrap_err();
        assert_eq!(err.reason.as_deref(), Some("shutdown"));

        drop(held);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn test_acquire_short_circuits_when_already_cancelled() {
        let pool = AdmissionPool::new(2);
        let cancel = CancellationToken::new();
        cancel.cancel("early exit");

        let err = pool.acquire(&cancel).await.unwrap_err();
        assert_eq!(err.reason.as_deref(), Some("early exit"));
        assert_eq!(pool.available(), 2);
    }

    #[test]
    #[should_panic(expected = "admission capacity must be at least 1")]
    fn test_zero_capacity_rejected() {
        let _pool = AdmissionPool::new(0);
    }
}
