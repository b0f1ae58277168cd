use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::warn;

/// Bounded pool of async workers. Submissions never block: a task waits for a permit inside the
/// pool and counts as queued until it gets one.
#[derive(Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
    tracker: TaskTracker,
}

impl WorkerPool {
    pub fn new(num_workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(num_workers.max(1))),
            waiting: Arc::new(AtomicUsize::new(0)),
            tracker: TaskTracker::new(),
        }
    }

    pub fn submit<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        let waiting = Arc::clone(&self.waiting);
        waiting.fetch_add(1, Ordering::SeqCst);
        self.tracker.spawn(async move {
            let permit = permits.acquire_owned().await;
            waiting.fetch_sub(1, Ordering::SeqCst);
            match permit {
                Ok(_permit) => task.await,
                Err(_) => warn!(component = "WorkerPool", "Worker pool closed, dropping task"),
            }
        });
    }

    /// Tasks submitted but not yet running.
    pub fn waiting_queue_size(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Waits for every task submitted so far. The pool stays usable afterwards.
    pub async fn wait(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
