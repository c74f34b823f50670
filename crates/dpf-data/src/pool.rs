//! Worker pool for per-shard work
//!
//! Each task is one shard path; the pool hands back one typed result per task,
//! in task order, and the caller merges them.

use rayon::prelude::*;
use tracing::debug;

use crate::DataError;

/// Outcome of a single task
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult<T, R> {
    pub task: T,
    pub result: R,
}

/// Fixed-size thread pool mapping a function over independent tasks
pub struct ShardPool {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl ShardPool {
    /// Create a pool with `workers` threads (at least one)
    pub fn new(workers: usize) -> Result<Self, DataError> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|idx| format!("dpf-shard-{}", idx))
            .build()?;
        Ok(Self { pool, workers })
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `f` over every task. Results keep the order of `tasks`.
    pub fn map<T, R, F>(&self, tasks: Vec<T>, f: F) -> Vec<TaskResult<T, R>>
    where
        T: Send,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        debug!("Mapping {} tasks over {} workers", tasks.len(), self.workers);
        self.pool.install(|| {
            tasks
                .into_par_iter()
                .map(|task| {
                    let result = f(&task);
                    TaskResult { task, result }
                })
                .collect()
        })
    }

    /// Run `f` inside the pool, for callers that drive rayon themselves
    pub fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        self.pool.install(f)
    }
}
