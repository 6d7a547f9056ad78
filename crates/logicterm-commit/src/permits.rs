//! Write permits and write-completion services.

use crate::error::{CommitError, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Bounded pool of permits for in-flight writes, with a drain barrier.
///
/// Every scheduled write holds one permit until it finishes. [`drain`] swaps in
/// a fresh pool and then takes every permit of the old one, so it returns only
/// once all writes scheduled before the swap have completed.
///
/// [`drain`]: WritePermitPool::drain
#[derive(Debug)]
pub struct WritePermitPool {
    capacity: usize,
    current: Mutex<Arc<Semaphore>>,
    generation: AtomicU64,
}

impl WritePermitPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            capacity,
            current: Mutex::new(Arc::new(Semaphore::new(capacity))),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit> {
        let pool = Arc::clone(&*self.current.lock());
        self.acquire_from(pool).await
    }

    /// Acquire from `pool`, moving on to the current generation when `pool`
    /// was closed by a drain while this caller waited on it.
    async fn acquire_from(&self, mut pool: Arc<Semaphore>) -> Result<OwnedSemaphorePermit> {
        loop {
            match Arc::clone(&pool).acquire_owned().await {
                Ok(permit) => return Ok(permit),
                Err(_) => {
                    let current = Arc::clone(&*self.current.lock());
                    if Arc::ptr_eq(&current, &pool) {
                        return Err(CommitError::PermitPoolClosed);
                    }
                    pool = current;
                }
            }
        }
    }

    /// Wait for every write scheduled against the current generation.
    ///
    /// The old pool is closed before its permits are released, so a caller
    /// still queued on it never starts a write after the barrier.
    pub async fn drain(&self) -> Result<()> {
        let all_permits = u32::try_from(self.capacity).map_err(|_| CommitError::PermitCapacity {
            capacity: self.capacity,
        })?;
        let previous = {
            let mut current = self.current.lock();
            std::mem::replace(&mut *current, Arc::new(Semaphore::new(self.capacity)))
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, capacity = self.capacity, "draining write permit pool");

        let all = Arc::clone(&previous)
            .acquire_many_owned(all_permits)
            .await
            .map_err(|_| CommitError::PermitPoolClosed)?;
        previous.close();
        drop(all);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits free in the current generation.
    pub fn available(&self) -> usize {
        self.current.lock().available_permits()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Runs blocking persistence calls off the async runtime, at most
/// `writer_threads` at a time.
#[derive(Debug, Clone)]
pub struct WriteCompletionService {
    name: &'static str,
    workers: Arc<Semaphore>,
}

impl WriteCompletionService {
    pub fn new(name: &'static str, writer_threads: usize) -> Self {
        Self {
            name,
            workers: Arc::new(Semaphore::new(writer_threads.max(1))),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub async fn run<F, T>(&self, write: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let _worker = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| CommitError::PermitPoolClosed)?;
        Ok(tokio::task::spawn_blocking(write).await?)
    }
}
