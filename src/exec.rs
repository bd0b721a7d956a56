//! Explicit execution context for the parallel stages
//!
//! Every training or gradient-descent call receives an `ExecutionContext`
//! instead of consulting process-wide state. A context either borrows rayon's
//! global pool or owns a dedicated pool with a fixed number of threads.

use crate::core::{DalError, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};

pub struct ExecutionContext {
    pool: Option<ThreadPool>,
}

impl ExecutionContext {
    /// Context with `n_threads` workers; `0` uses rayon's global pool
    pub fn new(n_threads: usize) -> Result<Self> {
        if n_threads == 0 {
            return Ok(Self::global());
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .build()
            .map_err(|e| DalError::Computation(format!("failed to build thread pool: {e}")))?;
        Ok(Self { pool: Some(pool) })
    }

    /// Context that runs on rayon's global pool
    pub fn global() -> Self {
        Self { pool: None }
    }

    /// Single-threaded context
    pub fn sequential() -> Result<Self> {
        Self::new(1)
    }

    /// Number of worker threads parallel regions will use
    pub fn n_threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    /// Run `op` with this context's pool as the ambient rayon pool
    pub fn install<R, F>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::global()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("n_threads", &self.n_threads())
            .field("dedicated_pool", &self.pool.is_some())
            .finish()
    }
}
