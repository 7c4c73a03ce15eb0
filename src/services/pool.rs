use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

/// Bounded-concurrency executor for fetch work.
///
/// A fixed number of workers pull queued futures and push their outputs onto
/// a results channel. Completion order is unspecified. The output type `R`
/// must already encode failure (for fetches, `FetchResult::Failed` carrying
/// the instrument code): a submitted future has no way to surface an error
/// to the pool, which makes the "every task yields exactly one result"
/// contract a type-level guarantee rather than a caller convention.
pub struct TaskPool<R> {
    job_tx: Option<mpsc::UnboundedSender<BoxFuture<'static, R>>>,
    result_rx: mpsc::UnboundedReceiver<R>,
    workers: Vec<JoinHandle<()>>,
}

impl<R: Send + 'static> TaskPool<R> {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (job_tx, job_rx) = mpsc::unbounded_channel::<BoxFuture<'static, R>>();
        let (result_tx, result_rx) = mpsc::unbounded_channel::<R>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let handles = (0..workers)
            .map(|id| {
                let job_rx = Arc::clone(&job_rx);
                let result_tx = result_tx.clone();
                tokio::spawn(async move {
                    loop {
                        // Hold the lock only for the dequeue, not the run.
                        let job = { job_rx.lock().await.recv().await };
                        match job {
                            Some(job) => {
                                let result = job.await;
                                if result_tx.send(result).is_err() {
                                    break;
                                }
                            }
                            None => {
                                debug!(worker = id, "task queue closed, worker exiting");
                                break;
                            }
                        }
                    }
                })
            })
            .collect();

        TaskPool { job_tx: Some(job_tx), result_rx, workers: handles }
    }

    /// Enqueue one unit of work. Silently dropped after `shutdown`.
    pub fn submit<F>(&self, task: F)
    where
        F: std::future::Future<Output = R> + Send + 'static,
    {
        if let Some(tx) = &self.job_tx {
            let _ = tx.send(Box::pin(task));
        }
    }

    /// A handle that can submit work from other tasks (e.g. delayed
    /// resubmission after a backoff sleep).
    pub fn submitter(&self) -> Option<TaskSubmitter<R>> {
        self.job_tx.as_ref().map(|tx| TaskSubmitter { job_tx: tx.clone() })
    }

    /// Wait up to `timeout` for the next completed result.
    pub async fn poll(&mut self, timeout: Duration) -> Option<R> {
        tokio::time::timeout(timeout, self.result_rx.recv()).await.ok().flatten()
    }

    /// Receive without a deadline. Returns `None` once the pool is shut down
    /// and every completed result has been drained.
    pub async fn recv(&mut self) -> Option<R> {
        self.result_rx.recv().await
    }

    /// Stop accepting work and release the workers. In-flight tasks are
    /// aborted best-effort; results already completed remain drainable.
    pub fn shutdown(&mut self) {
        self.job_tx = None;
        for handle in self.workers.drain(..) {
            handle.abort();
        }
    }
}

impl<R> Drop for TaskPool<R> {
    fn drop(&mut self) {
        for handle in self.workers.drain(..) {
            handle.abort();
        }
    }
}

/// Cloneable submission handle detached from the pool's consumer side.
pub struct TaskSubmitter<R> {
    job_tx: mpsc::UnboundedSender<BoxFuture<'static, R>>,
}

impl<R> Clone for TaskSubmitter<R> {
    fn clone(&self) -> Self {
        TaskSubmitter { job_tx: self.job_tx.clone() }
    }
}

impl<R: Send + 'static> TaskSubmitter<R> {
    pub fn submit<F>(&self, task: F)
    where
        F: std::future::Future<Output = R> + Send + 'static,
    {
        let _ = self.job_tx.send(Box::pin(task));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[tokio::test]
    async fn test_n_tasks_yield_n_results() {
        let mut pool: TaskPool<u32> = TaskPool::new(4);
        for i in 0..32u32 {
            pool.submit(async move { i });
        }
        let mut seen = HashSet::new();
        for _ in 0..32 {
            let r = pool.poll(Duration::from_secs(5)).await.unwrap();
            seen.insert(r);
        }
        // Order is unconstrained; the set of results is not.
        assert_eq!(seen, (0..32).collect::<HashSet<u32>>());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut pool: TaskPool<()> = TaskPool::new(3);
        for _ in 0..12 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }
        for _ in 0..12 {
            pool.poll(Duration::from_secs(5)).await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_poll_times_out_when_idle() {
        let mut pool: TaskPool<u32> = TaskPool::new(2);
        assert!(pool.poll(Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_after_partial_drain() {
        let mut pool: TaskPool<u32> = TaskPool::new(2);
        for i in 0..8u32 {
            pool.submit(async move { i });
        }
        let first = pool.poll(Duration::from_secs(5)).await;
        assert!(first.is_some());
        pool.shutdown();
        // Must not hang; whatever completed before the abort stays drainable.
        while let Some(_r) = pool.poll(Duration::from_millis(50)).await {}
    }

    #[tokio::test]
    async fn test_submitter_feeds_pool() {
        let mut pool: TaskPool<u32> = TaskPool::new(2);
        let submitter = pool.submitter().unwrap();
        tokio::spawn(async move {
            submitter.submit(async { 7 });
        });
        assert_eq!(pool.poll(Duration::from_secs(5)).await, Some(7));
    }
}
