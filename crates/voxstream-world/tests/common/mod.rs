#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded};
use voxstream_storage::{CellKind, VoxelCell};
use voxstream_world::{
    ChunkStreamer, Direction, GenerationStrategy, GeometryBuilder, MeshBuffer, MeshContext,
    SectionCells, SectionId, StreamConfig,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Generate(SectionId),
    Decorate(SectionId),
}

/// Stone below `height`, air above. Records every call in order.
pub struct FlatGenerator {
    pub height: i32,
    pub generated: AtomicUsize,
    pub events: Mutex<Vec<Event>>,
    /// Sleep a little per section, varied by position, to shuffle worker completion order.
    pub jitter: bool,
}

impl FlatGenerator {
    pub fn new(height: i32) -> Self {
        Self {
            height,
            generated: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
            jitter: false,
        }
    }

    pub fn jittered(height: i32) -> Self {
        Self {
            jitter: true,
            ..Self::new(height)
        }
    }

    pub fn generated(&self) -> usize {
        self.generated.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl GenerationStrategy for FlatGenerator {
    fn generate(&self, target: &mut SectionCells<'_>) {
        if self.jitter {
            let h = (target.id.chunk.cx * 7 + target.id.chunk.cz * 13 + target.id.index as i32 * 5)
                .rem_euclid(4);
            thread::sleep(Duration::from_millis(h as u64));
        }
        let size = target.size;
        for y in 0..size {
            let wy = target.origin[1] + y as i32;
            let cell = if wy < self.height {
                VoxelCell::new(CellKind::Stone)
            } else {
                VoxelCell::AIR
            };
            for z in 0..size {
                for x in 0..size {
                    target.set(x, y, z, cell);
                }
            }
        }
        self.generated.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().push(Event::Generate(target.id));
    }

    fn decorate(&self, target: &mut SectionCells<'_>) -> bool {
        self.events.lock().unwrap().push(Event::Decorate(target.id));
        false
    }
}

/// Blocks inside `generate` until [`Gate::open`] is called.
pub struct GatedGenerator {
    inner: FlatGenerator,
    release: Receiver<()>,
    pub started: AtomicBool,
}

pub struct Gate(Sender<()>);

impl Gate {
    pub fn open(self) {
        drop(self.0);
    }
}

impl GatedGenerator {
    pub fn new(height: i32) -> (Self, Gate) {
        let (tx, rx) = bounded(0);
        (
            Self {
                inner: FlatGenerator::new(height),
                release: rx,
                started: AtomicBool::new(false),
            },
            Gate(tx),
        )
    }
}

impl GenerationStrategy for GatedGenerator {
    fn generate(&self, target: &mut SectionCells<'_>) {
        self.started.store(true, Ordering::SeqCst);
        // returns once the sender is dropped
        let _ = self.release.recv();
        self.inner.generate(target);
    }
}

/// One quad per exposed top face; counts builds.
#[derive(Default)]
pub struct TopFaces {
    pub builds: AtomicUsize,
}

impl GeometryBuilder for TopFaces {
    fn build_mesh(&self, world: &MeshContext<'_>, out: &mut MeshBuffer, min: [i32; 3], max: [i32; 3], _lod: u8) {
        self.builds.fetch_add(1, Ordering::SeqCst);
        for wy in min[1]..max[1] {
            for wz in min[2]..max[2] {
                for wx in min[0]..max[0] {
                    let here = world.cell_world(wx, wy, wz);
                    if here.is_empty() || !world.cell_world(wx, wy + 1, wz).is_empty() {
                        continue;
                    }
                    let (x, y, z) = (wx as f32, wy as f32 + 1.0, wz as f32);
                    out.push_quad(
                        [[x, y, z], [x, y, z + 1.0], [x + 1.0, y, z + 1.0], [x + 1.0, y, z]],
                        Direction::PosY,
                        here.kind,
                    );
                }
            }
        }
    }
}

pub fn config(size: usize, stack: usize, visible: i32, cached: i32) -> StreamConfig {
    let mut cfg = StreamConfig::default();
    cfg.chunk.size = size;
    cfg.chunk.stack_height = stack;
    cfg.streaming.visible_radius = visible;
    cfg.streaming.cached_radius = cached;
    cfg.streaming.max_new_chunks_per_tick = 64;
    cfg.threading.multithreading = false;
    cfg.threading.io_thread = false;
    cfg
}

/// Tick until `done` holds, sleeping between ticks when workers are threaded.
pub fn run_until(
    streamer: &mut ChunkStreamer,
    viewer: [f32; 3],
    timeout: Duration,
    mut done: impl FnMut(&ChunkStreamer) -> bool,
) {
    let start = Instant::now();
    loop {
        streamer.update(viewer);
        if done(streamer) {
            return;
        }
        assert!(start.elapsed() < timeout, "condition not reached by tick {}", streamer.tick());
        thread::sleep(Duration::from_micros(200));
    }
}

pub fn all_synced(streamer: &ChunkStreamer) -> bool {
    !streamer.is_empty()
        && streamer
            .chunks()
            .all(|c| c.sections().iter().all(|s| s.vertices_synced()))
}

pub fn arc<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
