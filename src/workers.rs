//! Bounded pool for ledger work spawned off the chat handlers.
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
        }
    }

    /// Run `job` on the runtime once one of the worker slots is free.
    /// Returns immediately; the job queues if every slot is busy.
    pub fn spawn<F>(&self, job: F) -> JoinHandle<Option<F::Output>>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                warn!("worker pool closed; dropping job");
                return None;
            };
            Some(job.await)
        })
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_capacity() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                pool.spawn(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    i
                })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let mut done: Vec<usize> = results.into_iter().map(|r| r.unwrap().unwrap()).collect();
        done.sort_unstable();
        assert_eq!(done, vec![0, 1, 2, 3, 4, 5]);
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }
}
