//! Voxel cells and run-length compressed storage.
#![forbid(unsafe_code)]

pub mod cell;
pub mod codec;
pub mod runlist;

pub use cell::{CellKind, VoxelCell};
pub use codec::{BinaryCodec, CodecError};
pub use runlist::{Run, RunList};
