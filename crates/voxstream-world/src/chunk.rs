use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicUsize, Ordering};

use voxstream_runtime::{Priority, WorkBuffer, WorkItem};
use voxstream_storage::{RunList, VoxelCell};

use crate::coord::{ChunkCoord, Direction, SectionId};
use crate::persist::{ChunkSnapshot, LoadOutcome, PersistError};
use crate::pool::Recycle;
use crate::section::{Section, SectionData};
use crate::services::{MeshPool, Services, TickContext};
use crate::stage::Stage;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LoadState {
    Idle = 0,
    InFlight = 1,
    Loaded = 2,
    Missing = 3,
    Discarded = 4,
}

impl LoadState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => LoadState::InFlight,
            2 => LoadState::Loaded,
            3 => LoadState::Missing,
            4 => LoadState::Discarded,
            _ => LoadState::Idle,
        }
    }
}

fn header_field(field: &'static str, value: i64) -> Result<i16, PersistError> {
    i16::try_from(value).map_err(|_| PersistError::HeaderRange { field, value })
}

/// An in-flight disk load. Dropped without `complete`, e.g. by a panic while reading, it
/// deletes the file and reports the load as discarded so the column regenerates.
struct LoadRun {
    coord: ChunkCoord,
    shared: Arc<ChunkShared>,
    services: Arc<Services>,
    done: bool,
}

impl LoadRun {
    fn complete(mut self, state: LoadState) {
        self.done = true;
        self.shared.set_load_state(state);
    }
}

impl Drop for LoadRun {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        log::error!(target: "persist", "load of chunk ({}, {}) aborted; discarding it", self.coord.cx, self.coord.cz);
        if let Some(store) = &self.services.store {
            store.discard(self.coord);
        }
        self.shared.set_load_state(LoadState::Discarded);
    }
}

/// Column state shared with I/O workers: the sections' data plus the save barrier.
pub struct ChunkShared {
    sections: Vec<Arc<SectionData>>,
    chunk_size: usize,
    modified: AtomicBool,
    save_countdown: AtomicUsize,
    load: AtomicU8,
    loaded_from_disk: AtomicBool,
    /// Highest solid world-local y in the column, -1 if none.
    highest_solid: AtomicI32,
    /// Lowest empty world-local y in the column, the column height if none.
    lowest_empty: AtomicI32,
}

impl ChunkShared {
    #[inline]
    pub fn section(&self, index: usize) -> Option<&Arc<SectionData>> {
        self.sections.get(index)
    }

    #[inline]
    pub fn is_modified(&self) -> bool {
        self.modified.load(Ordering::Acquire)
    }

    #[inline]
    pub fn loaded_from_disk(&self) -> bool {
        self.loaded_from_disk.load(Ordering::Acquire)
    }

    #[inline]
    pub fn load_state(&self) -> LoadState {
        LoadState::from_u8(self.load.load(Ordering::Acquire))
    }

    fn set_load_state(&self, state: LoadState) {
        self.load.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub fn highest_solid(&self) -> i32 {
        self.highest_solid.load(Ordering::Acquire)
    }

    #[inline]
    pub fn lowest_empty(&self) -> i32 {
        self.lowest_empty.load(Ordering::Acquire)
    }

    /// Called once per section as it reaches `SaveData`. The caller that brings the
    /// countdown to zero writes the file, if the column changed since the last write.
    pub fn report_saved(&self, coord: ChunkCoord, services: &Services) {
        let prev = self
            .save_countdown
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or_else(|_| panic!("save barrier underflow for chunk ({}, {})", coord.cx, coord.cz));
        if prev != 1 || !self.modified.swap(false, Ordering::AcqRel) {
            return;
        }
        let Some(store) = &services.store else {
            return;
        };
        match self.snapshot().and_then(|snapshot| store.save(coord, &snapshot)) {
            Ok(bytes) => log::debug!(target: "persist", "saved chunk ({}, {}) {} bytes", coord.cx, coord.cz, bytes),
            Err(e) => {
                log::error!(target: "persist", "saving chunk ({}, {}) failed: {}", coord.cx, coord.cz, e);
                self.modified.store(true, Ordering::Release);
            }
        }
    }

    /// The column as it would be written. Fails if a header value does not fit its i16 field.
    pub fn snapshot(&self) -> Result<ChunkSnapshot, PersistError> {
        let non_empty = self
            .sections
            .iter()
            .map(|s| header_field("non-empty count", s.non_empty().into()))
            .collect::<Result<Vec<_>, _>>()?;
        let max_render_y = header_field("max render y", self.highest_solid().into())?;
        let min_render_y = header_field("min render y", self.lowest_empty().into())?;
        let mut cells = RunList::new();
        let mut flat = Vec::with_capacity(self.chunk_size.pow(3) * self.sections.len());
        for s in &self.sections {
            flat.extend(s.read_cells().iter());
        }
        cells.recompress(&flat);
        Ok(ChunkSnapshot {
            non_empty,
            max_render_y,
            min_render_y,
            cells,
        })
    }

    fn apply_snapshot(&self, snapshot: &ChunkSnapshot) {
        let volume = self.chunk_size.pow(3);
        let flat: Vec<VoxelCell> = snapshot.cells.decompress();
        for (s, cells) in self.sections.iter().zip(flat.chunks_exact(volume)) {
            s.store_cells(cells, self.chunk_size);
        }
        self.highest_solid.store(snapshot.max_render_y.into(), Ordering::Release);
        self.lowest_empty.store(snapshot.min_render_y.into(), Ordering::Release);
        self.loaded_from_disk.store(true, Ordering::Release);
    }

    fn refresh_bounds(&self) {
        let size = self.chunk_size as i32;
        let mut highest = -1;
        let mut lowest = size * self.sections.len() as i32;
        for (i, s) in self.sections.iter().enumerate() {
            let base = i as i32 * size;
            let hs = s.highest_solid();
            if hs >= 0 {
                highest = highest.max(base + hs);
            }
            let le = s.lowest_empty();
            if le < size {
                lowest = lowest.min(base + le);
            }
        }
        self.highest_solid.store(highest, Ordering::Release);
        self.lowest_empty.store(lowest, Ordering::Release);
    }

    fn reset(&self) {
        self.modified.store(false, Ordering::Release);
        self.save_countdown.store(0, Ordering::Release);
        self.set_load_state(LoadState::Idle);
        self.loaded_from_disk.store(false, Ordering::Release);
        self.highest_solid.store(-1, Ordering::Release);
        self.lowest_empty.store(0, Ordering::Release);
    }
}

/// One column of sections, recycled through the streamer's object pool.
pub struct Chunk {
    coord: ChunkCoord,
    shared: Arc<ChunkShared>,
    sections: Vec<Section>,
    visible: bool,
    lod: u8,
    removing: bool,
}

impl Chunk {
    pub fn new(chunk_size: usize, stack_height: usize, require_full_neighborhood: bool) -> Self {
        let sections: Vec<Section> = (0..stack_height)
            .map(|i| Section::new(i, stack_height, chunk_size, require_full_neighborhood))
            .collect();
        let shared = Arc::new(ChunkShared {
            sections: sections.iter().map(|s| s.data().clone()).collect(),
            chunk_size,
            modified: AtomicBool::new(false),
            save_countdown: AtomicUsize::new(0),
            load: AtomicU8::new(LoadState::Idle as u8),
            loaded_from_disk: AtomicBool::new(false),
            highest_solid: AtomicI32::new(-1),
            lowest_empty: AtomicI32::new(0),
        });
        Self {
            coord: ChunkCoord::default(),
            shared,
            sections,
            visible: false,
            lod: 0,
            removing: false,
        }
    }

    #[inline]
    pub fn coord(&self) -> ChunkCoord {
        self.coord
    }

    #[inline]
    pub fn shared(&self) -> &Arc<ChunkShared> {
        &self.shared
    }

    #[inline]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    #[inline]
    pub fn section(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    #[inline]
    pub fn section_mut(&mut self, index: usize) -> Option<&mut Section> {
        self.sections.get_mut(index)
    }

    #[inline]
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    #[inline]
    pub fn lod(&self) -> u8 {
        self.lod
    }

    #[inline]
    pub fn is_removing(&self) -> bool {
        self.removing
    }

    /// Every section finished `FinalizeData` at least once.
    pub fn is_finalized(&self) -> bool {
        self.sections
            .iter()
            .all(|s| s.data().completed().contains(Stage::FinalizeData))
    }

    /// Take over `coord`: queue a disk load when a store is configured, otherwise generation.
    pub fn activate(&mut self, coord: ChunkCoord, tick: u64, services: &Arc<Services>, io: &WorkBuffer) {
        self.coord = coord;
        for s in &mut self.sections {
            s.bind(coord);
        }
        if services.store.is_none() {
            self.request_generate();
            return;
        }
        self.shared.set_load_state(LoadState::InFlight);
        let run = LoadRun {
            coord,
            shared: self.shared.clone(),
            services: services.clone(),
            done: false,
        };
        io.submit(
            WorkItem::new(Priority::At(tick), move || {
                let state = match run.services.store.as_ref().map(|store| store.load(coord)) {
                    Some(LoadOutcome::Loaded(snapshot)) => {
                        run.shared.apply_snapshot(&snapshot);
                        LoadState::Loaded
                    }
                    Some(LoadOutcome::Discarded(_)) => LoadState::Discarded,
                    Some(LoadOutcome::Missing) | None => LoadState::Missing,
                };
                run.complete(state);
            })
            .with_label("load"),
        );
    }

    fn request_generate(&mut self) {
        for s in &self.sections {
            s.data().pending.insert(Stage::Generate);
        }
    }

    pub(crate) fn update(&mut self, ctx: &mut TickContext<'_>) {
        match self.shared.load_state() {
            LoadState::InFlight => return,
            LoadState::Loaded => {
                log::debug!(target: "persist", "loaded chunk ({}, {})", self.coord.cx, self.coord.cz);
                for s in &mut self.sections {
                    s.mark_loaded();
                }
                self.shared.set_load_state(LoadState::Idle);
            }
            LoadState::Missing | LoadState::Discarded => {
                self.request_generate();
                self.shared.set_load_state(LoadState::Idle);
            }
            LoadState::Idle => {}
        }

        if self.removing
            && !self.is_finished()
            && self.sections.iter().all(Section::can_remove_immediately)
        {
            for s in &mut self.sections {
                s.remove_now();
            }
        }

        for s in &mut self.sections {
            s.update(&self.shared, ctx);
        }
        self.shared.refresh_bounds();
    }

    pub(crate) fn set_visible(&mut self, visible: bool, lod: u8) {
        self.visible = visible;
        self.lod = lod;
        for s in &mut self.sections {
            s.set_visible(visible, lod);
        }
    }

    /// Start unloading. The chunk is saved first when persistence is on.
    pub(crate) fn request_remove(&mut self, persistence: bool) {
        if self.removing {
            return;
        }
        self.removing = true;
        self.visible = false;
        for s in &mut self.sections {
            s.begin_removal();
        }
        if persistence {
            self.arm_save();
        }
    }

    /// Queue `SaveData` on every section. Returns false if nothing needs writing or a save
    /// round is already underway.
    pub(crate) fn request_save(&mut self) -> bool {
        if self.removing || !self.shared.is_modified() || !self.is_finalized() {
            return false;
        }
        self.arm_save()
    }

    fn arm_save(&mut self) -> bool {
        let n = self.sections.len();
        if self
            .shared
            .save_countdown
            .compare_exchange(0, n, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        for s in &mut self.sections {
            s.mark_save();
        }
        true
    }

    /// All sections removed and no load left in flight.
    pub fn is_finished(&self) -> bool {
        self.shared.load_state() != LoadState::InFlight && self.sections.iter().all(Section::is_finished)
    }

    /// Apply queued edits. Returns every section whose geometry must be rebuilt.
    pub(crate) fn apply_mutations(&mut self, stack_height: usize, targets: &mut Vec<SectionId>) {
        for s in &mut self.sections {
            let Some(boundary) = s.apply_mutations() else {
                continue;
            };
            self.shared.modified.store(true, Ordering::Release);
            targets.push(s.id());
            targets.extend(Direction::from_mask(boundary).filter_map(|d| s.id().neighbor(d, stack_height)));
        }
    }

    pub(crate) fn release_meshes(&mut self, meshes: &mut MeshPool) {
        for s in &mut self.sections {
            s.release_mesh(meshes);
        }
    }
}

impl Recycle for Chunk {
    fn reset(&mut self) {
        self.coord = ChunkCoord::default();
        for s in &mut self.sections {
            s.reset();
        }
        self.shared.reset();
        self.visible = false;
        self.lod = 0;
        self.removing = false;
    }
}
