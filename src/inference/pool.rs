//! Bounded pool for blocking engine calls
//!
//! Jobs run on tokio's blocking threads; a semaphore caps how many run at
//! once. The permit travels with the job, so a job whose caller stopped
//! waiting still occupies its slot until the native call returns.

use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};

/// Errors from the pool itself, not from the job
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Worker pool is shut down")]
    Closed,
    #[error("Worker panicked: {0}")]
    Panicked(String),
}

#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Jobs currently running
    pub fn busy(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    /// Submit a blocking job and wait for its result
    ///
    /// Dropping the returned future abandons the wait, not the job.
    pub async fn run<F, T>(&self, job: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        let (tx, rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
            // The receiver is gone when the caller timed out.
            let _ = tx.send(outcome);
        });

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(panic)) => Err(PoolError::Panicked(panic_message(panic.as_ref()))),
            Err(_) => Err(PoolError::Closed),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_job() {
        let pool = WorkerPool::new(2);
        let value = pool.run(|| 21 * 2).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(pool.busy(), 0);
    }

    #[tokio::test]
    async fn test_panic_is_reported() {
        let pool = WorkerPool::new(1);
        let err = pool.run(|| -> u32 { panic!("boom") }).await.unwrap_err();
        assert_eq!(err, PoolError::Panicked("boom".to_string()));
        // The slot is released after a panic.
        assert_eq!(pool.run(|| 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let running = running.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_abandoned_job_keeps_slot() {
        let pool = WorkerPool::new(1);
        let slow = pool.run(|| std::thread::sleep(Duration::from_millis(200)));
        let _ = tokio::time::timeout(Duration::from_millis(20), slow).await;

        assert_eq!(pool.busy(), 1);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(pool.busy(), 0);
    }
}
