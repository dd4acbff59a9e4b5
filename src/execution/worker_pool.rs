//! Bounded pool of worker slots for task bodies
//!
//! A task body only runs while it holds a [`WorkerPermit`]. Tasks waiting for a
//! permit stay `Pending`; the permit is released when the body returns, before
//! lifecycle hooks run.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Worker pool bounding concurrent task bodies
///
/// Cloning is cheap; clones share the same slots.
///
/// # Examples
///
/// ```rust
/// use taskchain_core::execution::WorkerPool;
///
/// #[tokio::main]
/// async fn main() {
///     let pool = WorkerPool::new(2);
///     let permit = pool.acquire().await.unwrap();
///     assert_eq!(pool.stats().busy_workers, 1);
///     drop(permit);
///     assert_eq!(pool.stats().available_workers, 2);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct WorkerPool {
    slots: Arc<Semaphore>,
    capacity: usize,
    busy: Arc<AtomicUsize>,
    completed: Arc<AtomicU64>,
}

impl WorkerPool {
    /// Create a pool with `capacity` slots (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            busy: Arc::new(AtomicUsize::new(0)),
            completed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> Result<WorkerPermit, WorkerPoolError> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| WorkerPoolError::Closed)?;
        let busy = self.busy.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(busy, capacity = self.capacity, "Worker slot acquired");

        Ok(WorkerPermit {
            _permit: permit,
            busy: Arc::clone(&self.busy),
            completed: Arc::clone(&self.completed),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stop handing out slots; pending and future `acquire` calls fail
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn is_closed(&self) -> bool {
        self.slots.is_closed()
    }

    pub fn stats(&self) -> WorkerPoolStats {
        let busy = self.busy.load(Ordering::SeqCst);
        WorkerPoolStats {
            capacity: self.capacity,
            busy_workers: busy,
            available_workers: self.capacity.saturating_sub(busy),
            completed_runs: self.completed.load(Ordering::SeqCst),
        }
    }
}

/// Proof of an occupied worker slot; the slot frees on drop
#[derive(Debug)]
pub struct WorkerPermit {
    _permit: OwnedSemaphorePermit,
    busy: Arc<AtomicUsize>,
    completed: Arc<AtomicU64>,
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        self.busy.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Worker pool statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WorkerPoolStats {
    pub capacity: usize,
    pub busy_workers: usize,
    pub available_workers: usize,
    pub completed_runs: u64,
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("Worker pool is closed")]
    Closed,
}
