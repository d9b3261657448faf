//! Chunk streaming: section pipeline, neighbor fan-in, clipmap and persistence.
#![forbid(unsafe_code)]

pub mod chunk;
pub mod clipmap;
pub mod config;
pub mod coord;
pub mod error;
pub mod mutation;
pub mod neighbors;
pub mod persist;
pub mod pool;
pub mod section;
pub mod services;
pub mod stage;
pub mod strategy;
pub mod streamer;

pub use chunk::{Chunk, ChunkShared, LoadState};
pub use clipmap::{Clipmap, ClipmapCell};
pub use config::{ConfigError, StreamConfig, ViewParams, load_config_from_path};
pub use coord::{ChunkCoord, Direction, SectionId};
pub use error::{EditError, StreamError};
pub use mutation::CellMutation;
pub use neighbors::{FanIn, NeighborSlots};
pub use persist::{ChunkSnapshot, ChunkStore, LoadOutcome, PersistError};
pub use pool::{ObjectPool, Recycle, SlotHandle, SlotPool};
pub use section::{Section, SectionData};
pub use stage::{Stage, StageSet};
pub use strategy::{
    GenerationStrategy, GeometryBuilder, MeshBuffer, MeshContext, RenderMesh, SectionCells, Vertex,
};
pub use streamer::{ChunkStreamer, StreamerStats};
