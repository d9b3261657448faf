use std::sync::Arc;

use hashbrown::HashMap;
use voxstream_runtime::{ArrayPool, WorkBuffer};
use voxstream_storage::VoxelCell;

use crate::chunk::ChunkShared;
use crate::coord::{ChunkCoord, Direction, SectionId};
use crate::persist::ChunkStore;
use crate::pool::SlotPool;
use crate::section::SectionData;
use crate::stage::Stage;
use crate::strategy::{GenerationStrategy, GeometryBuilder, RenderMesh};

pub type MeshPool = SlotPool<RenderMesh>;

/// Everything a worker stage needs besides the section it runs for.
pub struct Services {
    pub generator: Arc<dyn GenerationStrategy>,
    pub builder: Arc<dyn GeometryBuilder>,
    pub arrays: ArrayPool<VoxelCell>,
    pub store: Option<ChunkStore>,
    pub chunk_size: usize,
    pub stack_height: usize,
}

impl Services {
    /// `scratch_arrays` bounds the section-sized arrays alive at once; size it to at least the
    /// number of compute workers.
    pub fn new(
        generator: Arc<dyn GenerationStrategy>,
        builder: Arc<dyn GeometryBuilder>,
        store: Option<ChunkStore>,
        chunk_size: usize,
        stack_height: usize,
        scratch_arrays: usize,
    ) -> Self {
        let volume = chunk_size * chunk_size * chunk_size;
        Self {
            generator,
            builder,
            arrays: ArrayPool::new(VoxelCell::AIR).with_class(volume, scratch_arrays.max(1)),
            store,
            chunk_size,
            stack_height,
        }
    }

    #[inline]
    pub fn section_volume(&self) -> usize {
        self.chunk_size * self.chunk_size * self.chunk_size
    }

    /// World position of a section's cell (0, 0, 0).
    pub fn section_origin(&self, id: SectionId) -> [i32; 3] {
        let (ox, oz) = id.chunk.origin(self.chunk_size);
        [ox, id.index as i32 * self.chunk_size as i32, oz]
    }
}

/// A stage broadcast waiting to be delivered to one subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Notification {
    pub from: SectionId,
    pub to: SectionId,
    pub stage: Stage,
}

/// Borrowed driver state handed down through one tick of chunk and section updates.
pub struct TickContext<'a> {
    pub tick: u64,
    pub services: &'a Arc<Services>,
    pub compute: &'a WorkBuffer,
    pub io: &'a WorkBuffer,
    pub meshes: &'a mut MeshPool,
    pub outbox: &'a mut Vec<Notification>,
    pub lookup: &'a HashMap<ChunkCoord, Arc<ChunkShared>>,
    pub persistence: bool,
}

impl TickContext<'_> {
    /// Shared state of the six face neighbors of `id`, where tracked.
    pub fn neighbor_data(&self, id: SectionId) -> [Option<Arc<SectionData>>; 6] {
        let stack = self.services.stack_height;
        Direction::ALL.map(|dir| {
            let n = id.neighbor(dir, stack)?;
            self.lookup.get(&n.chunk)?.section(n.index as usize).cloned()
        })
    }
}
