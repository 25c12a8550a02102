//! Dedicated rayon pool for model training, kept off the async runtime's threads.

use crate::error::{EngineError, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use tokio::sync::oneshot;
use tracing::error;

pub struct TrainingPool {
    pool: ThreadPool,
}

impl TrainingPool {
    pub fn new(threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("funnel-train-{i}"))
            .panic_handler(|_| error!("training job panicked"))
            .build()
            .map_err(|e| EngineError::Internal(format!("training pool: {e}")))?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `job` on the pool. Parallel iterators inside the job use this pool too.
    pub async fn run<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.pool.spawn(move || {
            let _ = tx.send(job());
        });
        rx.await
            .map_err(|_| EngineError::Internal("training job did not complete".into()))
    }
}
