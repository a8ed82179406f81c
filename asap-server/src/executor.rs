//! Bounded executor for blocking handlers.
//!
//! Admission is a semaphore of `max_workers + queue_size` permits taken
//! with `try_acquire_owned`, so submission never waits: when every permit
//! is out the job is refused with [`ExecutorError::Exhausted`], which the
//! server turns into HTTP 503. Admitted jobs wait for one of `max_workers`
//! worker permits and then run on tokio's blocking pool.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Executor errors.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Executor queue is full ({in_flight} jobs in flight)")]
    Exhausted { in_flight: usize },

    #[error("Executor is shut down")]
    Shutdown,

    #[error("Job panicked: {0}")]
    Panicked(String),
}

/// Render a panic payload for logs.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Worker pool limits over tokio's blocking threads.
#[derive(Debug)]
pub struct BoundedExecutor {
    admission: Arc<Semaphore>,
    workers: Arc<Semaphore>,
    max_workers: usize,
    capacity: usize,
}

impl BoundedExecutor {
    /// Allow `max_workers` concurrent jobs plus `queue_size` waiting ones.
    pub fn new(max_workers: usize, queue_size: usize) -> Self {
        let max_workers = max_workers.max(1);
        let capacity = max_workers + queue_size.max(1);
        tracing::debug!(max_workers, capacity, "Bounded executor started");
        Self {
            admission: Arc::new(Semaphore::new(capacity)),
            workers: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            capacity,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Jobs queued or running.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.admission.available_permits()
    }

    /// Reserve room for one job without waiting.
    ///
    /// Holding the slot guarantees the job will be accepted; dropping it
    /// unused gives the room back.
    pub fn try_reserve(&self) -> Result<ExecutorSlot, ExecutorError> {
        let admission = Arc::clone(&self.admission)
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::NoPermits => ExecutorError::Exhausted {
                    in_flight: self.in_flight(),
                },
                TryAcquireError::Closed => ExecutorError::Shutdown,
            })?;
        Ok(ExecutorSlot {
            admission,
            workers: Arc::clone(&self.workers),
        })
    }

    /// Reserve a slot and run `job` in it.
    pub async fn run<F, T>(&self, job: F) -> Result<T, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.try_reserve()?.run(job).await
    }

    /// Refuse new jobs; admitted ones still run to completion.
    pub fn shutdown(&self) {
        self.admission.close();
    }
}

/// Admission for one job, from [`BoundedExecutor::try_reserve`].
#[derive(Debug)]
pub struct ExecutorSlot {
    admission: OwnedSemaphorePermit,
    workers: Arc<Semaphore>,
}

impl ExecutorSlot {
    /// Wait for a worker and run `job` on the blocking pool.
    ///
    /// Both permits move into the blocking task, so the slot stays taken
    /// until the job finishes even if the caller stops waiting.
    pub async fn run<F, T>(self, job: F) -> Result<T, ExecutorError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let admission = self.admission;
        let worker = self
            .workers
            .acquire_owned()
            .await
            .map_err(|_| ExecutorError::Shutdown)?;

        let handle = tokio::task::spawn_blocking(move || {
            let _permits = (admission, worker);
            job()
        });
        match handle.await {
            Ok(value) => Ok(value),
            Err(e) if e.is_panic() => Err(ExecutorError::Panicked(panic_message(&*e.into_panic()))),
            Err(_) => Err(ExecutorError::Shutdown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::channel;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_jobs() {
        let executor = BoundedExecutor::new(2, 2);
        let value = executor.run(|| 21 * 2).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_panic_does_not_poison_executor() {
        let executor = BoundedExecutor::new(1, 1);
        let err = executor
            .run(|| -> u32 { panic!("boom") })
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutorError::Panicked(ref m) if m.contains("boom")));

        // The single worker permit came back
        assert_eq!(executor.run(|| 7).await.unwrap(), 7);
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_full_queue_fails_fast() {
        let executor = BoundedExecutor::new(1, 1);
        let (release_tx, release_rx) = channel::<()>();
        let release_rx = Arc::new(Mutex::new(release_rx));
        let (started_tx, started_rx) = channel::<()>();

        let running = tokio::spawn(executor.try_reserve().unwrap().run(move || {
            started_tx.send(()).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
        }));
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // Worker busy: one job fits in the queue, the next is refused
        let queued = tokio::spawn(executor.try_reserve().unwrap().run(|| ()));
        let err = executor.try_reserve().unwrap_err();
        assert!(matches!(err, ExecutorError::Exhausted { in_flight: 2 }));

        release_tx.send(()).unwrap();
        running.await.unwrap().unwrap();
        queued.await.unwrap().unwrap();
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_unused_slot_is_returned() {
        let executor = BoundedExecutor::new(1, 1);
        let first = executor.try_reserve().unwrap();
        let _second = executor.try_reserve().unwrap();
        assert!(executor.try_reserve().is_err());

        drop(first);
        assert_eq!(executor.in_flight(), 1);
        assert!(executor.try_reserve().is_ok());
    }

    #[tokio::test]
    async fn test_worker_limit_caps_concurrency() {
        let executor = Arc::new(BoundedExecutor::new(2, 8));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut jobs = Vec::new();
        for _ in 0..8 {
            let (running, peak) = (running.clone(), peak.clone());
            let slot = executor.try_reserve().unwrap();
            jobs.push(tokio::spawn(slot.run(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
            })));
        }
        for job in jobs {
            job.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(executor.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_jobs() {
        let executor = BoundedExecutor::new(1, 1);
        let slot = executor.try_reserve().unwrap();
        executor.shutdown();

        assert!(matches!(executor.try_reserve(), Err(ExecutorError::Shutdown)));
        assert_eq!(slot.run(|| 5).await.unwrap(), 5);
    }
}
