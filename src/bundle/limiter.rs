//! Concurrency cap for remote loads within one bundle call.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

/// Caps the number of futures running through [`Limiter::run`] at once.
///
/// `None` means unlimited.
#[derive(Debug, Clone)]
pub struct Limiter {
    semaphore: Option<Arc<Semaphore>>,
}

impl Limiter {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            semaphore: limit.map(|limit| Arc::new(Semaphore::new(limit.max(1)))),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Run `task` once a slot is free.
    pub async fn run<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        // Acquire permit; the semaphore is never closed
        let _permit = match &self.semaphore {
            Some(semaphore) => semaphore.acquire().await.ok(),
            None => None,
        };
        task.await
    }
}

impl Default for Limiter {
    fn default() -> Self {
        Self::unlimited()
    }
}
