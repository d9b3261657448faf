use std::thread;

use crate::pool::{PoolError, PoolStats, WorkerPool};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub multithreading: bool,
    pub io_thread: bool,
    /// Compute workers; 0 picks [`default_compute_threads`].
    pub compute_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            multithreading: true,
            io_thread: true,
            compute_threads: 0,
        }
    }
}

/// `max(logical cores - 1, 1)`, leaving one core for the driver thread.
pub fn default_compute_threads() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .saturating_sub(1)
        .max(1)
}

/// The compute and I/O pools, built once at startup and handed to whoever submits work.
pub struct PoolRegistry {
    compute: WorkerPool,
    io: WorkerPool,
}

impl PoolRegistry {
    pub fn new(cfg: &RuntimeConfig) -> Result<Self, PoolError> {
        let compute = if cfg.multithreading {
            let n = if cfg.compute_threads == 0 {
                default_compute_threads()
            } else {
                cfg.compute_threads
            };
            WorkerPool::new("voxstream-compute", n)?
        } else {
            WorkerPool::inline("voxstream-compute")
        };
        let io = if cfg.multithreading && cfg.io_thread {
            WorkerPool::new("voxstream-io", 1)?
        } else {
            WorkerPool::inline("voxstream-io")
        };
        log::info!(
            target: "pool",
            "pools ready: compute={} io={}",
            describe(&compute),
            describe(&io)
        );
        Ok(Self { compute, io })
    }

    /// Both pools run work synchronously on the committing thread.
    pub fn inline() -> Self {
        Self {
            compute: WorkerPool::inline("voxstream-compute"),
            io: WorkerPool::inline("voxstream-io"),
        }
    }

    #[inline]
    pub fn compute(&self) -> &WorkerPool {
        &self.compute
    }

    #[inline]
    pub fn io(&self) -> &WorkerPool {
        &self.io
    }

    pub fn stats(&self) -> (PoolStats, PoolStats) {
        (self.compute.stats(), self.io.stats())
    }

    pub fn is_idle(&self) -> bool {
        self.compute.is_idle() && self.io.is_idle()
    }

    pub fn shutdown(&self) {
        self.compute.shutdown();
        self.io.shutdown();
    }
}

fn describe(pool: &WorkerPool) -> String {
    if pool.is_inline() {
        "inline".to_string()
    } else {
        format!("{} threads", pool.workers())
    }
}
