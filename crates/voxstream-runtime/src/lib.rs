//! Worker pools, per-tick commit buffers and pooled scratch arrays.
#![forbid(unsafe_code)]

mod array_pool;
mod buffer;
mod pool;
mod registry;
mod work;

pub use array_pool::{ArrayPool, PooledArray};
pub use buffer::WorkBuffer;
pub use pool::{PoolError, PoolStats, WorkerPool};
pub use registry::{PoolRegistry, RuntimeConfig, default_compute_threads};
pub use work::{Priority, WorkItem};
