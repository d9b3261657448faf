use std::collections::VecDeque;
use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use voxstream_runtime::{PoolRegistry, PoolStats, WorkBuffer};
use voxstream_storage::VoxelCell;

use crate::chunk::{Chunk, ChunkShared};
use crate::clipmap::Clipmap;
use crate::config::{ConfigError, StreamConfig, ViewParams};
use crate::coord::{ChunkCoord, Direction, SectionId};
use crate::error::{EditError, StreamError};
use crate::mutation::CellMutation;
use crate::persist::ChunkStore;
use crate::pool::{ObjectPool, SlotPool};
use crate::section::Section;
use crate::services::{MeshPool, Notification, Services, TickContext};
use crate::strategy::{GenerationStrategy, GeometryBuilder, RenderMesh};

/// Smallest mesh slot handed out, in vertices.
const MIN_MESH_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamerStats {
    pub tick: u64,
    pub tracked: usize,
    pub visible: usize,
    pub removing: usize,
    pub pooled: usize,
    pub meshes: usize,
    pub activated: u64,
    pub recycled: u64,
    pub rebuilds: u64,
    pub compute: PoolStats,
    pub io: PoolStats,
}

/// Keeps the chunks around a moving viewer loaded, generated, meshed and, when
/// persistence is on, saved. Driven by one [`ChunkStreamer::update`] per tick.
pub struct ChunkStreamer {
    config: StreamConfig,
    pools: Arc<PoolRegistry>,
    services: Arc<Services>,
    compute: WorkBuffer,
    io: WorkBuffer,
    clipmap: Clipmap,
    chunks: HashMap<ChunkCoord, Box<Chunk>>,
    lookup: HashMap<ChunkCoord, Arc<ChunkShared>>,
    chunk_pool: ObjectPool<Box<Chunk>>,
    meshes: MeshPool,
    ring: Vec<(i32, i32)>,
    candidates: VecDeque<ChunkCoord>,
    candidates_dirty: bool,
    viewer: Option<ChunkCoord>,
    visible: HashSet<ChunkCoord>,
    outbox: Vec<Notification>,
    draining: bool,
    tick: u64,
    activated: u64,
    recycled: u64,
    rebuilds: u64,
}

impl ChunkStreamer {
    pub fn new(
        config: StreamConfig,
        pools: Arc<PoolRegistry>,
        generator: Arc<dyn GenerationStrategy>,
        builder: Arc<dyn GeometryBuilder>,
    ) -> Result<Self, StreamError> {
        config.validate()?;
        let size = config.chunk.size;
        let stack = config.chunk.stack_height;
        let full = config.lod.require_full_neighborhood;
        let store = if config.streaming.persistence {
            Some(ChunkStore::open(&config.streaming.save_dir, stack, size)?)
        } else {
            None
        };
        let scratch = pools.compute().workers() * 2 + 2;
        let services = Arc::new(Services::new(generator, builder, store, size, stack, scratch));
        let clipmap = Clipmap::new(config.view(), size);
        let side = 2 * config.streaming.cached_radius as usize + 1;
        let chunk_pool = ObjectPool::new(side * side, move || Box::new(Chunk::new(size, stack, full)));
        log::info!(
            target: "stream",
            "streamer ready: size={} stack={} visible={} cached={} persistence={} preallocated={}",
            size,
            stack,
            config.streaming.visible_radius,
            config.streaming.cached_radius,
            config.streaming.persistence,
            side * side
        );
        Ok(Self {
            ring: ring_order(config.streaming.cached_radius),
            config,
            pools,
            services,
            compute: WorkBuffer::new("compute"),
            io: WorkBuffer::new("io"),
            clipmap,
            chunks: HashMap::new(),
            lookup: HashMap::new(),
            chunk_pool,
            meshes: SlotPool::new(MIN_MESH_CAPACITY, RenderMesh::with_capacity),
            candidates: VecDeque::new(),
            candidates_dirty: true,
            viewer: None,
            visible: HashSet::new(),
            outbox: Vec::new(),
            draining: false,
            tick: 0,
            activated: 0,
            recycled: 0,
            rebuilds: 0,
        })
    }

    #[inline]
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    #[inline]
    pub fn clipmap(&self) -> &Clipmap {
        &self.clipmap
    }

    #[inline]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    #[inline]
    pub fn meshes(&self) -> &MeshPool {
        &self.meshes
    }

    pub fn chunk(&self, coord: ChunkCoord) -> Option<&Chunk> {
        self.chunks.get(&coord).map(|c| &**c)
    }

    pub fn section(&self, id: SectionId) -> Option<&Section> {
        self.chunk(id.chunk)?.section(id.index as usize)
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> + '_ {
        self.chunks.values().map(|c| &**c)
    }

    /// Chunks currently in the visible band.
    pub fn visible(&self) -> impl Iterator<Item = ChunkCoord> + '_ {
        self.visible.iter().copied()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// One driver step. `viewer` is a world-space position.
    pub fn update(&mut self, viewer: [f32; 3]) {
        self.tick += 1;
        let center = ChunkCoord::from_world(
            viewer[0].floor() as i32,
            viewer[2].floor() as i32,
            self.config.chunk.size,
        );
        if self.viewer != Some(center) {
            self.clipmap.recenter(center);
            self.viewer = Some(center);
            self.candidates_dirty = true;
            log::debug!(target: "stream", "[tick {}] viewer in chunk ({}, {})", self.tick, center.cx, center.cz);
        }

        self.apply_mutations();
        self.classify();
        self.drive();
        self.admit(center);
        self.reclaim();

        let compute = self.compute.commit(self.pools.compute());
        let io = self.io.commit(self.pools.io());
        log::trace!(target: "stream", "[tick {}] committed compute={} io={}", self.tick, compute, io);
    }

    fn apply_mutations(&mut self) {
        let stack = self.config.chunk.stack_height;
        let mut targets = Vec::new();
        for chunk in self.chunks.values_mut() {
            chunk.apply_mutations(stack, &mut targets);
        }
        if targets.is_empty() {
            return;
        }
        let unique: HashSet<SectionId> = targets.into_iter().collect();
        for id in unique {
            if let Some(s) = section_mut(&mut self.chunks, id) {
                s.request_rebuild();
                self.rebuilds += 1;
            }
        }
    }

    /// Evict chunks that left the cached band and refresh visibility and LOD for the rest.
    fn classify(&mut self) {
        let persistence = self.config.streaming.persistence;
        for (coord, chunk) in self.chunks.iter_mut() {
            if chunk.is_removing() {
                continue;
            }
            let keep = !self.draining
                && self.clipmap.is_inside_bounds(*coord)
                && in_world(&self.config, *coord);
            if !keep {
                log::debug!(target: "stream", "[tick {}] unloading ({}, {})", self.tick, coord.cx, coord.cz);
                chunk.request_remove(persistence);
                self.visible.remove(coord);
                continue;
            }
            let cell = self.clipmap.get_transformed(*coord);
            if cell.in_visible_range {
                self.visible.insert(*coord);
            } else {
                self.visible.remove(coord);
            }
            chunk.set_visible(cell.in_visible_range, cell.lod);
        }
    }

    fn drive(&mut self) {
        let mut ctx = TickContext {
            tick: self.tick,
            services: &self.services,
            compute: &self.compute,
            io: &self.io,
            meshes: &mut self.meshes,
            outbox: &mut self.outbox,
            lookup: &self.lookup,
            persistence: self.config.streaming.persistence,
        };
        for chunk in self.chunks.values_mut() {
            chunk.update(&mut ctx);
        }
        for note in self.outbox.drain(..) {
            if let Some(s) = section_mut(&mut self.chunks, note.to) {
                s.on_notified(note.from, note.stage);
            }
        }
    }

    fn admit(&mut self, center: ChunkCoord) {
        if self.draining {
            return;
        }
        if self.candidates_dirty {
            self.candidates.clear();
            for &(dx, dz) in &self.ring {
                let coord = center.offset(dx, dz);
                if !self.chunks.contains_key(&coord) && in_world(&self.config, coord) {
                    self.candidates.push_back(coord);
                }
            }
            self.candidates_dirty = false;
        }
        let mut admitted = 0;
        while admitted < self.config.streaming.max_new_chunks_per_tick {
            let Some(coord) = self.candidates.pop_front() else {
                break;
            };
            if self.chunks.contains_key(&coord) || !self.clipmap.is_inside_bounds(coord) {
                continue;
            }
            self.activate(coord);
            admitted += 1;
        }
    }

    fn activate(&mut self, coord: ChunkCoord) {
        let mut chunk = self.chunk_pool.pop();
        chunk.activate(coord, self.tick, &self.services, &self.io);
        let cell = self.clipmap.get_transformed(coord);
        chunk.set_visible(cell.in_visible_range, cell.lod);
        if cell.in_visible_range {
            self.visible.insert(coord);
        }
        self.lookup.insert(coord, chunk.shared().clone());
        self.chunks.insert(coord, chunk);
        self.link(coord);
        self.activated += 1;
        log::trace!(target: "stream", "[tick {}] activated ({}, {})", self.tick, coord.cx, coord.cz);
    }

    /// Subscribe a new column's sections to each other and to live horizontal neighbors.
    fn link(&mut self, coord: ChunkCoord) {
        let stack = self.config.chunk.stack_height;
        for i in 1..stack {
            link_sections(
                &mut self.chunks,
                SectionId::new(coord, (i - 1) as u8),
                SectionId::new(coord, i as u8),
            );
        }
        for dir in Direction::HORIZONTAL {
            let other = coord.step(dir);
            match self.chunks.get(&other) {
                Some(c) if !c.is_removing() => {}
                _ => continue,
            }
            for i in 0..stack {
                link_sections(
                    &mut self.chunks,
                    SectionId::new(coord, i as u8),
                    SectionId::new(other, i as u8),
                );
            }
        }
    }

    /// Recycle chunks whose sections have all finished `Remove`.
    fn reclaim(&mut self) {
        let finished: Vec<ChunkCoord> = self
            .chunks
            .iter()
            .filter(|(_, c)| c.is_removing() && c.is_finished())
            .map(|(k, _)| *k)
            .collect();
        for coord in finished {
            let Some(mut chunk) = self.chunks.remove(&coord) else {
                continue;
            };
            self.lookup.remove(&coord);
            for s in chunk.sections() {
                for n in s.neighbors().iter().filter(|n| n.chunk != coord) {
                    if let Some(ns) = section_mut(&mut self.chunks, n) {
                        ns.detach(s.id());
                    }
                }
            }
            chunk.release_meshes(&mut self.meshes);
            self.visible.remove(&coord);
            self.chunk_pool.push(chunk);
            self.candidates_dirty = true;
            self.recycled += 1;
            log::trace!(target: "stream", "[tick {}] recycled ({}, {})", self.tick, coord.cx, coord.cz);
        }
        if self.draining && self.chunks.is_empty() {
            self.chunk_pool.compact();
        }
    }

    /// Queue a cell write at a world position. Applied on a later tick once the section is idle.
    pub fn set_cell(&mut self, wx: i32, wy: i32, wz: i32, cell: VoxelCell) -> Result<(), EditError> {
        let (id, local) = self.locate(wx, wy, wz)?;
        let size = self.config.chunk.size;
        let stack = self.config.chunk.stack_height;
        let chunk = self
            .chunks
            .get_mut(&id.chunk)
            .filter(|c| !c.is_removing())
            .ok_or(EditError::ChunkNotLoaded(id.chunk))?;
        if let Some(s) = chunk.section_mut(id.index as usize) {
            s.queue_mutation(CellMutation::new(id, local, cell, size, stack));
        }
        Ok(())
    }

    /// Current stored cell at a world position. Cells of a section that has not generated
    /// yet read as air.
    pub fn get_cell(&self, wx: i32, wy: i32, wz: i32) -> Result<VoxelCell, EditError> {
        let (id, [x, y, z]) = self.locate(wx, wy, wz)?;
        let size = self.config.chunk.size;
        let section = self.section(id).ok_or(EditError::ChunkNotLoaded(id.chunk))?;
        Ok(section.data().read_cells().get((y * size + z) * size + x))
    }

    fn locate(&self, wx: i32, wy: i32, wz: i32) -> Result<(SectionId, [usize; 3]), EditError> {
        let size = self.config.chunk.size;
        let height = self.config.chunk_height();
        if wy < 0 || wy as usize >= height {
            return Err(EditError::OutOfBounds { y: wy, height });
        }
        let coord = ChunkCoord::from_world(wx, wz, size);
        let (ox, oz) = coord.origin(size);
        let y = wy as usize;
        let id = SectionId::new(coord, (y / size) as u8);
        Ok((id, [(wx - ox) as usize, y % size, (wz - oz) as usize]))
    }

    /// Write every finalized, modified chunk without unloading it. Returns how many were queued.
    pub fn save_modified(&mut self) -> usize {
        if self.services.store.is_none() {
            return 0;
        }
        let queued = self
            .chunks
            .values_mut()
            .map(|c| c.request_save())
            .filter(|queued| *queued)
            .count();
        if queued > 0 {
            log::info!(target: "persist", "[tick {}] saving {} modified chunks", self.tick, queued);
        }
        queued
    }

    /// Unload everything. Keep calling [`ChunkStreamer::update`] until [`ChunkStreamer::is_empty`].
    pub fn unload_all(&mut self) {
        log::info!(target: "stream", "[tick {}] draining {} chunks", self.tick, self.chunks.len());
        self.draining = true;
        self.candidates.clear();
    }

    /// Swap radii or LOD settings at runtime.
    pub fn reconfigure_view(&mut self, view: ViewParams) -> Result<(), ConfigError> {
        view.validate(self.config.chunk.size)?;
        if !self.clipmap.reconfigure(view) {
            return Ok(());
        }
        self.config.streaming.visible_radius = view.visible_radius;
        self.config.streaming.cached_radius = view.cached_radius;
        self.config.lod.forced_lod = view.forced_lod;
        self.config.lod.lod_coefficient = view.lod_coefficient;
        self.ring = ring_order(view.cached_radius);
        self.candidates_dirty = true;
        log::info!(
            target: "stream",
            "view reconfigured: visible={} cached={} forced_lod={:?} coefficient={}",
            view.visible_radius,
            view.cached_radius,
            view.forced_lod,
            view.lod_coefficient
        );
        Ok(())
    }

    pub fn stats(&self) -> StreamerStats {
        let (compute, io) = self.pools.stats();
        StreamerStats {
            tick: self.tick,
            tracked: self.chunks.len(),
            visible: self.visible.len(),
            removing: self.chunks.values().filter(|c| c.is_removing()).count(),
            pooled: self.chunk_pool.free_count(),
            meshes: self.meshes.live_count(),
            activated: self.activated,
            recycled: self.recycled,
            rebuilds: self.rebuilds,
            compute,
            io,
        }
    }
}

fn in_world(config: &StreamConfig, coord: ChunkCoord) -> bool {
    let r = config.streaming.world_radius;
    config.streaming.infinite_world || (coord.cx.abs() <= r && coord.cz.abs() <= r)
}

/// Offsets within `radius`, nearest first.
fn ring_order(radius: i32) -> Vec<(i32, i32)> {
    let mut ring: Vec<(i32, i32)> = (-radius..=radius)
        .flat_map(|dz| (-radius..=radius).map(move |dx| (dx, dz)))
        .collect();
    ring.sort_by_key(|&(dx, dz)| (dx.abs() + dz.abs(), dx.abs(), dz.abs(), dx, dz));
    ring
}

fn section_mut(chunks: &mut HashMap<ChunkCoord, Box<Chunk>>, id: SectionId) -> Option<&mut Section> {
    chunks.get_mut(&id.chunk)?.section_mut(id.index as usize)
}

/// Subscribe `a` and `b` to each other, replaying what each has already announced.
fn link_sections(chunks: &mut HashMap<ChunkCoord, Box<Chunk>>, a: SectionId, b: SectionId) {
    let Some(b_announced) = section_mut(chunks, b).map(|s| s.announced()) else {
        return;
    };
    let Some(a_announced) = section_mut(chunks, a).map(|s| {
        s.attach(b, b_announced);
        s.announced()
    }) else {
        return;
    };
    if let Some(s) = section_mut(chunks, b) {
        s.attach(a, a_announced);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_starts_at_the_center_and_covers_the_square() {
        let ring = ring_order(2);
        assert_eq!(ring.len(), 25);
        assert_eq!(ring[0], (0, 0));
        let dists: Vec<i32> = ring.iter().map(|(x, z)| x.abs() + z.abs()).collect();
        assert!(dists.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn finite_world_rejects_outside_columns() {
        let mut cfg = StreamConfig::default();
        cfg.streaming.infinite_world = false;
        cfg.streaming.world_radius = 2;
        assert!(in_world(&cfg, ChunkCoord::new(-2, 2)));
        assert!(!in_world(&cfg, ChunkCoord::new(3, 0)));
    }
}
