use std::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use voxstream_runtime::{Priority, WorkItem};
use voxstream_storage::{RunList, VoxelCell};

use crate::chunk::ChunkShared;
use crate::coord::{ChunkCoord, SectionId};
use crate::mutation::CellMutation;
use crate::neighbors::{FanIn, NeighborSlots};
use crate::pool::SlotHandle;
use crate::services::{MeshPool, Notification, TickContext};
use crate::stage::{AtomicStageSet, RunningStage, Stage, StageSet};
use crate::strategy::{MeshBuffer, MeshContext, SectionCells};

/// Work queued to run against a section's data once it is idle.
pub type DeferredWork = Box<dyn FnOnce(&SectionData) + Send>;

/// The half of a section that worker stages touch. Stage bits are written from worker
/// continuations; everything else about the section lives on the driver thread.
pub struct SectionData {
    cells: RwLock<RunList<VoxelCell>>,
    non_empty: AtomicU32,
    /// Highest local y holding a solid cell, -1 if none.
    highest_solid: AtomicI32,
    /// Lowest local y holding an empty cell, `size` if none.
    lowest_empty: AtomicI32,
    geometry: Mutex<MeshBuffer>,
    geometry_version: AtomicU64,
    pub(crate) pending: AtomicStageSet,
    pub(crate) completed: AtomicStageSet,
    pub(crate) notify: AtomicStageSet,
    pub(crate) running: RunningStage,
}

impl SectionData {
    pub fn new(size: usize) -> Self {
        Self {
            cells: RwLock::new(RunList::filled(size * size * size, VoxelCell::AIR)),
            non_empty: AtomicU32::new(0),
            highest_solid: AtomicI32::new(-1),
            lowest_empty: AtomicI32::new(0),
            geometry: Mutex::new(MeshBuffer::default()),
            geometry_version: AtomicU64::new(0),
            pending: AtomicStageSet::default(),
            completed: AtomicStageSet::default(),
            notify: AtomicStageSet::default(),
            running: RunningStage::new(),
        }
    }

    pub fn read_cells(&self) -> RwLockReadGuard<'_, RunList<VoxelCell>> {
        self.cells.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write_cells(&self) -> RwLockWriteGuard<'_, RunList<VoxelCell>> {
        self.cells.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn geometry(&self) -> MutexGuard<'_, MeshBuffer> {
        self.geometry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    pub fn geometry_version(&self) -> u64 {
        self.geometry_version.load(Ordering::Acquire)
    }

    #[inline]
    pub fn non_empty(&self) -> u32 {
        self.non_empty.load(Ordering::Acquire)
    }

    #[inline]
    pub fn highest_solid(&self) -> i32 {
        self.highest_solid.load(Ordering::Acquire)
    }

    #[inline]
    pub fn lowest_empty(&self) -> i32 {
        self.lowest_empty.load(Ordering::Acquire)
    }

    #[inline]
    pub fn completed(&self) -> StageSet {
        self.completed.load()
    }

    #[inline]
    pub fn pending(&self) -> StageSet {
        self.pending.load()
    }

    #[inline]
    pub fn running(&self) -> Option<Stage> {
        self.running.get()
    }

    /// Replace all cells from a flat array and refresh the derived counts.
    pub fn store_cells(&self, flat: &[VoxelCell], size: usize) {
        self.write_cells().recompress(flat);
        self.refresh_bounds(size);
    }

    /// Recount non-empty cells and the solid/empty height bounds from the runs.
    pub fn refresh_bounds(&self, size: usize) {
        let layer = size * size;
        let mut non_empty = 0u32;
        let mut highest = -1i32;
        let mut lowest = size as i32;
        for (start, run) in self.read_cells().spans() {
            let end = start + run.len as usize - 1;
            if run.value.is_empty() {
                lowest = lowest.min((start / layer) as i32);
            } else {
                non_empty += run.len;
                highest = highest.max((end / layer) as i32);
            }
        }
        self.non_empty.store(non_empty, Ordering::Release);
        self.highest_solid.store(highest, Ordering::Release);
        self.lowest_empty.store(lowest, Ordering::Release);
    }

    pub(crate) fn adjust_non_empty(&self, delta: i64) {
        if delta > 0 {
            self.non_empty.fetch_add(delta as u32, Ordering::AcqRel);
        } else if delta < 0 {
            self.non_empty.fetch_sub((-delta) as u32, Ordering::AcqRel);
        }
    }

    fn publish_geometry(&self) {
        self.geometry_version.fetch_add(1, Ordering::AcqRel);
    }

    /// Continuation of every worker stage: mark done, queue the announcement, free the section.
    fn finish(&self, stage: Stage) {
        self.completed.insert(stage);
        if let Some(next) = stage.announces() {
            self.notify.insert(next);
        }
        self.running.clear();
    }

    fn reset(&self, size: usize) {
        self.write_cells().fill(size * size * size, VoxelCell::AIR);
        self.non_empty.store(0, Ordering::Release);
        self.highest_solid.store(-1, Ordering::Release);
        self.lowest_empty.store(0, Ordering::Release);
        self.geometry().clear();
        self.geometry_version.store(0, Ordering::Release);
        self.pending.clear();
        self.completed.clear();
        self.notify.clear();
        self.running.clear();
    }
}

/// Completes its stage when dropped, so a panicking strategy cannot wedge the pipeline.
struct StageRun {
    data: Arc<SectionData>,
    stage: Stage,
    id: SectionId,
    done: bool,
}

impl StageRun {
    fn complete(mut self) {
        self.done = true;
        self.data.finish(self.stage);
    }
}

impl Drop for StageRun {
    fn drop(&mut self) {
        if !self.done {
            log::error!(target: "pipeline", "{} for {:?} aborted; marking it complete", self.stage.name(), self.id);
            self.data.finish(self.stage);
        }
    }
}

/// Driver-side state of one section: neighbor subscriptions, fan-in votes and queued edits.
pub struct Section {
    id: SectionId,
    size: usize,
    data: Arc<SectionData>,
    neighbors: NeighborSlots,
    fan_in: [FanIn; 3],
    /// Stages this section has announced to its subscribers.
    broadcast: StageSet,
    vertices_synced: bool,
    require_full_neighborhood: bool,
    visible: bool,
    removing: bool,
    lod: u8,
    rebuild_urgent: bool,
    rebuilds_received: u64,
    uploaded_version: u64,
    mesh: Option<SlotHandle>,
    mutations: Vec<CellMutation>,
    deferred: Vec<DeferredWork>,
}

impl Section {
    pub fn new(index: usize, stack_height: usize, size: usize, require_full_neighborhood: bool) -> Self {
        Self {
            id: SectionId::new(ChunkCoord::default(), index as u8),
            size,
            data: Arc::new(SectionData::new(size)),
            neighbors: NeighborSlots::new(NeighborSlots::capacity_for(index, stack_height)),
            fan_in: [FanIn::default(); 3],
            broadcast: StageSet::EMPTY,
            vertices_synced: false,
            require_full_neighborhood,
            visible: false,
            removing: false,
            lod: 0,
            rebuild_urgent: false,
            rebuilds_received: 0,
            uploaded_version: 0,
            mesh: None,
            mutations: Vec::new(),
            deferred: Vec::new(),
        }
    }

    pub(crate) fn bind(&mut self, chunk: ChunkCoord) {
        self.id.chunk = chunk;
    }

    #[inline]
    pub fn id(&self) -> SectionId {
        self.id
    }

    #[inline]
    pub fn data(&self) -> &Arc<SectionData> {
        &self.data
    }

    #[inline]
    pub fn neighbors(&self) -> &NeighborSlots {
        &self.neighbors
    }

    #[inline]
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    #[inline]
    pub fn vertices_synced(&self) -> bool {
        self.vertices_synced
    }

    /// Rebuild requests seen since activation, from edits or late neighbors.
    #[inline]
    pub fn rebuilds_received(&self) -> u64 {
        self.rebuilds_received
    }

    #[inline]
    pub fn mesh(&self) -> Option<SlotHandle> {
        self.mesh
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.data.completed.contains(Stage::Remove)
    }

    /// Stages `other` already announced are replayed to this section.
    pub(crate) fn attach(&mut self, other: SectionId, announced: StageSet) {
        let slot = self.neighbors.register(other);
        for stage in announced.iter() {
            self.vote(slot, stage);
        }
    }

    pub(crate) fn detach(&mut self, other: SectionId) {
        let Some(slot) = self.neighbors.unregister(other) else {
            return;
        };
        for f in &mut self.fan_in {
            f.withdraw(slot);
        }
        for stage in [Stage::GenerateBlueprints, Stage::FinalizeData, Stage::BuildVertices] {
            self.evaluate(stage);
        }
    }

    #[inline]
    pub(crate) fn announced(&self) -> StageSet {
        self.broadcast
    }

    pub(crate) fn on_notified(&mut self, from: SectionId, stage: Stage) {
        match self.neighbors.slot_of(from) {
            Some(slot) => self.vote(slot, stage),
            None => log::trace!(target: "pipeline", "{:?} ignoring {} from unlinked {:?}", self.id, stage.name(), from),
        }
    }

    fn vote(&mut self, slot: usize, stage: Stage) {
        let Some(i) = stage.sync_slot() else {
            return;
        };
        if !self.is_open(stage) {
            if stage == Stage::BuildVertices && self.vertices_synced {
                self.request_rebuild();
            }
            return;
        }
        let fresh = self.fan_in[i].record(slot);
        assert!(
            fresh,
            "{:?} received a second {} notification from slot {slot}",
            self.id,
            stage.name()
        );
        assert!(
            self.fan_in[i].count() <= self.neighbors.registered(),
            "{:?} fan-in for {} exceeds its {} subscribers",
            self.id,
            stage.name(),
            self.neighbors.registered()
        );
        self.evaluate(stage);
    }

    /// Whether a synced stage is still waiting to fire this generation.
    fn is_open(&self, stage: Stage) -> bool {
        match stage {
            Stage::BuildVertices => !self.vertices_synced,
            _ => {
                !self.data.pending.contains(stage)
                    && !self.data.completed.contains(stage)
                    && self.data.running.get() != Some(stage)
            }
        }
    }

    fn evaluate(&mut self, stage: Stage) {
        let (Some(i), Some(pre)) = (stage.sync_slot(), stage.prerequisite()) else {
            return;
        };
        if !self.is_open(stage) || !self.data.completed.contains(pre) {
            return;
        }
        if self.fan_in[i].count() < self.neighbors.registered() {
            return;
        }
        if stage == Stage::BuildVertices && self.require_full_neighborhood && !self.neighbors.is_full() {
            return;
        }
        self.fan_in[i].reset();
        if stage == Stage::BuildVertices {
            self.vertices_synced = true;
            if self.visible && !self.removing {
                self.data.pending.insert(Stage::BuildVertices);
            }
        } else {
            self.data.pending.insert(stage);
        }
    }

    /// Queue a geometry rebuild once the section has been synchronized for vertices.
    pub(crate) fn request_rebuild(&mut self) {
        self.rebuilds_received += 1;
        if self.vertices_synced && self.visible && !self.removing {
            self.data.pending.insert(Stage::BuildVertices);
            self.rebuild_urgent = true;
        }
    }

    pub(crate) fn set_visible(&mut self, visible: bool, lod: u8) {
        let lod_changed = self.lod != lod;
        self.lod = lod;
        if visible == self.visible {
            if visible && lod_changed && self.vertices_synced && !self.removing {
                self.data.pending.insert(Stage::BuildVertices);
            }
            return;
        }
        self.visible = visible;
        if visible {
            if self.vertices_synced && !self.removing {
                self.data.pending.insert(Stage::BuildVertices);
            }
        } else {
            self.data.pending.remove(Stage::BuildVertices);
            self.data.completed.remove(Stage::BuildVertices);
        }
    }

    /// Returns false if the latest queued write to the same cell already has this kind.
    /// Writes apply in queue order, so the last one wins.
    pub(crate) fn queue_mutation(&mut self, mutation: CellMutation) -> bool {
        let latest = self.mutations.iter().rev().find(|m| m.index == mutation.index);
        if latest.is_some_and(|m| *m == mutation) {
            return false;
        }
        self.mutations.push(mutation);
        true
    }

    pub fn queued_mutations(&self) -> usize {
        self.mutations.len()
    }

    /// Run `work` on a compute worker once the section is idle.
    pub fn defer(&mut self, work: impl FnOnce(&SectionData) + Send + 'static) {
        self.deferred.push(Box::new(work));
        self.data.pending.insert(Stage::Deferred);
    }

    /// Apply queued edits if the section is idle with finalized data. Returns the neighbor
    /// directions whose geometry is affected, or `None` if nothing changed.
    pub(crate) fn apply_mutations(&mut self) -> Option<u8> {
        if self.mutations.is_empty() {
            return None;
        }
        if self.removing {
            log::debug!(target: "pipeline", "{:?} dropping {} edits on removal", self.id, self.mutations.len());
            self.mutations.clear();
            return None;
        }
        if self.data.running.is_running() || !self.data.completed.contains(Stage::FinalizeData) {
            return None;
        }
        let mut changed = false;
        let mut boundary = 0u8;
        let mut delta = 0i64;
        {
            let mut cells = self.data.write_cells();
            for m in self.mutations.drain(..) {
                let was_empty = cells.get(m.index).is_empty();
                if !cells.set(m.index, m.cell) {
                    continue;
                }
                changed = true;
                boundary |= m.boundary;
                match (was_empty, m.cell.is_empty()) {
                    (true, false) => delta += 1,
                    (false, true) => delta -= 1,
                    _ => {}
                }
            }
        }
        if !changed {
            return None;
        }
        self.data.adjust_non_empty(delta);
        self.data.refresh_bounds(self.size);
        Some(boundary)
    }

    pub(crate) fn mark_loaded(&mut self) {
        self.data.completed.insert(Stage::Generate);
        self.data.notify.insert(Stage::GenerateBlueprints);
    }

    pub(crate) fn mark_save(&mut self) {
        self.data.completed.remove(Stage::SaveData);
        self.data.pending.insert(Stage::SaveData);
    }

    pub(crate) fn begin_removal(&mut self) {
        self.removing = true;
        self.data.pending.remove(Stage::BuildVertices);
    }

    /// True while nothing has been generated and no worker holds the section.
    pub(crate) fn can_remove_immediately(&self) -> bool {
        !self.data.completed.contains(Stage::Generate) && !self.data.running.is_running()
    }

    pub(crate) fn remove_now(&mut self) {
        self.data.pending.clear();
        self.data.completed.insert(Stage::Remove);
    }

    pub(crate) fn release_mesh(&mut self, meshes: &mut MeshPool) {
        if let Some(handle) = self.mesh.take() {
            meshes.release(handle);
        }
    }

    pub(crate) fn update(&mut self, chunk: &Arc<ChunkShared>, ctx: &mut TickContext<'_>) {
        let announced = self.data.notify.take();
        for stage in announced.iter() {
            self.broadcast.insert(stage);
            for to in self.neighbors.iter() {
                ctx.outbox.push(Notification {
                    from: self.id,
                    to,
                    stage,
                });
            }
            self.evaluate(stage);
        }

        self.sync_mesh(ctx.meshes);

        if self.data.running.is_running() {
            return;
        }
        if self.removing && self.settle_removal(ctx.persistence) {
            return;
        }

        let pending = self.data.pending.load();
        let completed = self.data.completed.load();
        if pending.contains(Stage::Generate) {
            self.start_generate(ctx);
        } else if pending.contains(Stage::GenerateBlueprints) {
            self.start_blueprints(chunk, ctx);
        } else if pending.contains(Stage::FinalizeData) {
            self.start_finalize(ctx);
        } else if pending.contains(Stage::SaveData) && completed.contains(Stage::FinalizeData) {
            self.start_save(chunk, ctx);
        } else if pending.contains(Stage::BuildVertices) && !self.removing {
            self.start_vertices(ctx);
        } else if pending.contains(Stage::Deferred) {
            self.start_deferred(ctx);
        }
    }

    /// Returns true once the section has nothing left to do before it can be recycled.
    fn settle_removal(&mut self, persistence: bool) -> bool {
        let completed = self.data.completed.load();
        if completed.contains(Stage::Remove) {
            return true;
        }
        if !completed.contains(Stage::FinalizeData) {
            return false;
        }
        if persistence && !completed.contains(Stage::SaveData) {
            if !self.data.pending.contains(Stage::SaveData) {
                self.data.pending.insert(Stage::SaveData);
            }
            return false;
        }
        self.remove_now();
        true
    }

    fn priority(&self, tick: u64) -> Priority {
        if self.visible {
            Priority::At(tick)
        } else {
            Priority::Lowest
        }
    }

    fn begin(&self, stage: Stage) -> StageRun {
        self.data.pending.remove(stage);
        self.data.completed.remove(stage);
        self.data.running.set(stage);
        StageRun {
            data: self.data.clone(),
            stage,
            id: self.id,
            done: false,
        }
    }

    fn start_generate(&mut self, ctx: &mut TickContext<'_>) {
        let run = self.begin(Stage::Generate);
        let (data, services, id) = (self.data.clone(), ctx.services.clone(), self.id);
        ctx.compute.submit(
            WorkItem::new(self.priority(ctx.tick), move || {
                let size = services.chunk_size;
                let mut scratch = services.arrays.acquire(services.section_volume());
                let mut target = SectionCells::new(id, services.section_origin(id), size, &mut scratch[..]);
                services.generator.generate(&mut target);
                data.store_cells(&scratch, size);
                run.complete();
            })
            .with_label("generate"),
        );
    }

    fn start_blueprints(&mut self, chunk: &Arc<ChunkShared>, ctx: &mut TickContext<'_>) {
        let run = self.begin(Stage::GenerateBlueprints);
        if chunk.loaded_from_disk() {
            run.complete();
            return;
        }
        let (data, services, id) = (self.data.clone(), ctx.services.clone(), self.id);
        ctx.compute.submit(
            WorkItem::new(self.priority(ctx.tick), move || {
                let size = services.chunk_size;
                let mut scratch = services.arrays.acquire(services.section_volume());
                data.read_cells().decompress_into(&mut scratch);
                let mut target = SectionCells::new(id, services.section_origin(id), size, &mut scratch[..]);
                if services.generator.decorate(&mut target) {
                    data.store_cells(&scratch, size);
                }
                run.complete();
            })
            .with_label("blueprints"),
        );
    }

    fn start_finalize(&mut self, ctx: &mut TickContext<'_>) {
        let run = self.begin(Stage::FinalizeData);
        let (data, size) = (self.data.clone(), self.size);
        ctx.compute.submit(
            WorkItem::new(self.priority(ctx.tick), move || {
                data.refresh_bounds(size);
                run.complete();
            })
            .with_label("finalize"),
        );
    }

    fn start_save(&mut self, chunk: &Arc<ChunkShared>, ctx: &mut TickContext<'_>) {
        let run = self.begin(Stage::SaveData);
        let (shared, services, coord) = (chunk.clone(), ctx.services.clone(), self.id.chunk);
        ctx.io.submit(
            WorkItem::background(move || {
                shared.report_saved(coord, &services);
                run.complete();
            })
            .with_label("save"),
        );
    }

    fn start_vertices(&mut self, ctx: &mut TickContext<'_>) {
        let urgent = std::mem::take(&mut self.rebuild_urgent);
        let run = self.begin(Stage::BuildVertices);
        if self.data.non_empty() == 0 {
            self.data.geometry().clear();
            self.data.publish_geometry();
            run.complete();
            return;
        }
        let priority = if urgent { Priority::At(ctx.tick) } else { self.priority(ctx.tick) };
        let neighbors = ctx.neighbor_data(self.id);
        let (data, services, id, lod) = (self.data.clone(), ctx.services.clone(), self.id, self.lod);
        ctx.compute.submit(
            WorkItem::new(priority, move || {
                let size = services.chunk_size;
                let mut scratch = services.arrays.acquire(services.section_volume());
                data.read_cells().decompress_into(&mut scratch);
                let origin = services.section_origin(id);
                let world = MeshContext::new(id, origin, size, &scratch, &neighbors);
                let s = size as i32;
                let max = [origin[0] + s, origin[1] + s, origin[2] + s];
                {
                    let mut out = data.geometry();
                    out.clear();
                    services.builder.build_mesh(&world, &mut out, origin, max, lod);
                }
                data.publish_geometry();
                run.complete();
            })
            .with_label("vertices"),
        );
    }

    fn start_deferred(&mut self, ctx: &mut TickContext<'_>) {
        let run = self.begin(Stage::Deferred);
        let work = std::mem::take(&mut self.deferred);
        let data = self.data.clone();
        ctx.compute.submit(
            WorkItem::background(move || {
                for job in work {
                    job(&data);
                }
                run.complete();
            })
            .with_label("deferred"),
        );
    }

    /// Copy finished geometry into a render slot, or give the slot back when hidden.
    fn sync_mesh(&mut self, meshes: &mut MeshPool) {
        if !self.visible || self.removing {
            self.release_mesh(meshes);
            return;
        }
        if !self.data.completed.contains(Stage::BuildVertices) {
            return;
        }
        let version = self.data.geometry_version();
        if version == self.uploaded_version {
            return;
        }
        self.uploaded_version = version;
        self.release_mesh(meshes);
        let geometry = self.data.geometry();
        if geometry.is_empty() {
            return;
        }
        let handle = meshes.acquire(geometry.vertices.len());
        if let Some(mesh) = meshes.get_mut(handle) {
            mesh.upload(self.id, self.lod, &geometry);
        }
        self.mesh = Some(handle);
    }

    pub(crate) fn reset(&mut self) {
        debug_assert!(self.mesh.is_none(), "section recycled while holding a mesh slot");
        self.id.chunk = ChunkCoord::default();
        self.data.reset(self.size);
        self.neighbors.clear();
        self.fan_in = [FanIn::default(); 3];
        self.broadcast = StageSet::EMPTY;
        self.vertices_synced = false;
        self.visible = false;
        self.removing = false;
        self.lod = 0;
        self.rebuild_urgent = false;
        self.rebuilds_received = 0;
        self.uploaded_version = 0;
        self.mutations.clear();
        self.deferred.clear();
    }
}
