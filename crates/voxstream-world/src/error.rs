use thiserror::Error;
use voxstream_runtime::PoolError;

use crate::config::ConfigError;
use crate::coord::ChunkCoord;
use crate::persist::PersistError;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditError {
    #[error("chunk ({}, {}) is not loaded", .0.cx, .0.cz)]
    ChunkNotLoaded(ChunkCoord),
    #[error("y = {y} is outside the column (0..{height})")]
    OutOfBounds { y: i32, height: usize },
}
