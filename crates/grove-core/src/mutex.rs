//! # Transaction Mutex
//!
//! One mutex per store serializes submitted raw transactions.
//!
//! The mutex is a single-permit `tokio::sync::Semaphore`, which services
//! waiters in FIFO order. Stopping it closes the semaphore: waiters that are
//! still queued and every later submission fail with `MutexStopped`.

use crate::{GroveError, StoreId};
use std::future::Future;
use std::time::Duration;
use tokio::sync::Semaphore;

/// FIFO critical-section runner for one store.
#[derive(Debug)]
pub struct TransactionMutex {
    store_id: StoreId,
    permits: Semaphore,
    timeout: Option<Duration>,
}

impl TransactionMutex {
    /// Create a mutex for the given store.
    #[must_use]
    pub fn new(store_id: StoreId, timeout: Option<Duration>) -> Self {
        Self {
            store_id,
            permits: Semaphore::new(1),
            timeout,
        }
    }

    /// Run `critical` once every earlier submission has finished.
    ///
    /// With a timeout configured, a critical section that runs longer is
    /// dropped and reported as `TransactionTimeout`.
    pub async fn submit<T, F, Fut>(&self, critical: F) -> Result<T, GroveError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GroveError>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| GroveError::MutexStopped(self.store_id))?;

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, critical())
                .await
                .map_err(|_| GroveError::TransactionTimeout {
                    store: self.store_id,
                    millis: limit.as_millis() as u64,
                })?,
            None => critical().await,
        }
    }

    /// Stop the mutex. Queued and future submissions are rejected.
    pub fn stop(&self) {
        self.permits.close();
        tracing::debug!(store = %self.store_id, "transaction mutex stopped");
    }

    /// Whether the mutex has been stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.permits.is_closed()
    }
}

// =============================================================================
// TESTS
// =============================================================================
