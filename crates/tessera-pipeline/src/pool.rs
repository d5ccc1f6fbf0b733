//! Worker pools that run production requests

use crate::error::PipelineError;
use std::sync::Arc;

/// A unit of work submitted to a pool
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Asynchronous executor for production requests.
///
/// No ordering is guaranteed between submitted tasks.
pub trait WorkerPool: Send + Sync {
    fn submit(&self, task: Task);
}

/// Shared pool backed by a dedicated rayon thread pool
pub struct RayonPool {
    pool: rayon::ThreadPool,
}

impl RayonPool {
    /// Build a pool with `threads` workers; `0` uses rayon's default sizing.
    pub fn new(threads: usize) -> Result<Self, PipelineError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("tessera-producer-{i}"))
            .build()
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn shared(threads: usize) -> Result<Arc<dyn WorkerPool>, PipelineError> {
        Ok(Arc::new(Self::new(threads)?))
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

impl WorkerPool for RayonPool {
    fn submit(&self, task: Task) {
        self.pool.spawn(task);
    }
}

/// Runs every task immediately on the submitting thread.
///
/// Makes pipelines fully deterministic, which is what tests want.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlinePool;

impl InlinePool {
    pub fn shared() -> Arc<dyn WorkerPool> {
        Arc::new(InlinePool)
    }
}

impl WorkerPool for InlinePool {
    fn submit(&self, task: Task) {
        task();
    }
}
