mod watcher;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::Parser;
use voxstream_mesh::FaceMesher;
use voxstream_runtime::PoolRegistry;
use voxstream_storage::{CellKind, VoxelCell};
use voxstream_terrain::{NoiseTerrain, TerrainParams};
use voxstream_world::{ChunkStreamer, StreamConfig, load_config_from_path};

use watcher::ConfigWatcher;

#[derive(Parser, Debug)]
#[command(name = "voxstream", version, about = "Headless chunk streaming driver")]
struct Args {
    /// Stream config (TOML); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,
    /// Ticks to run before unloading
    #[arg(long, default_value_t = 600)]
    ticks: u64,
    /// Viewer speed along +X in cells per tick
    #[arg(long, default_value_t = 0.5)]
    speed: f32,
    /// Terrain seed
    #[arg(long, default_value_t = 1337)]
    seed: i32,
    /// Reload view parameters when the config file changes
    #[arg(long, default_value_t = false)]
    watch_config: bool,
    /// Place or clear a cell beside the viewer every N ticks (0 disables)
    #[arg(long, default_value_t = 0)]
    edit_every: u64,
    /// Target tick length in milliseconds
    #[arg(long, default_value_t = 16)]
    tick_ms: u64,
    /// Log filter, e.g. "info" or "stream=debug,pool=info"
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_level.as_str()))
        .target(env_logger::Target::Stdout)
        .init();

    let cfg = match &args.config {
        Some(path) => load_config_from_path(path)?,
        None => StreamConfig::default(),
    };
    let watcher = match (&args.config, args.watch_config) {
        (Some(path), true) => match ConfigWatcher::new(path) {
            Ok(w) => Some(w),
            Err(e) => {
                log::warn!("config watch disabled ({}): {}", path.display(), e);
                None
            }
        },
        (None, true) => {
            log::warn!("--watch-config needs --config");
            None
        }
        _ => None,
    };

    let pools = Arc::new(PoolRegistry::new(&cfg.runtime())?);
    let terrain = Arc::new(NoiseTerrain::new(args.seed, TerrainParams::default()));
    let height = cfg.chunk_height() as f32;
    let mut streamer = ChunkStreamer::new(cfg, pools.clone(), terrain, Arc::new(FaceMesher))?;

    let tick_len = Duration::from_millis(args.tick_ms);
    let mut viewer = [0.5f32, height * 0.5, 0.5];
    let mut placed = false;
    for tick in 0..args.ticks {
        let start = Instant::now();
        if let Some(w) = &watcher {
            if let Some(next) = w.poll() {
                if next.chunk != streamer.config().chunk || next.threading != streamer.config().threading {
                    log::warn!("chunk and threading changes take effect on restart");
                }
                if let Err(e) = streamer.reconfigure_view(next.view()) {
                    log::warn!("view reconfigure rejected: {}", e);
                }
            }
        }

        viewer[0] += args.speed;
        streamer.update(viewer);

        if args.edit_every > 0 && tick > 0 && tick % args.edit_every == 0 {
            let (wx, wy, wz) = (viewer[0].floor() as i32 + 2, viewer[1] as i32, viewer[2].floor() as i32);
            let cell = if placed {
                VoxelCell::AIR
            } else {
                VoxelCell::new(CellKind::Stone)
            };
            match streamer.set_cell(wx, wy, wz, cell) {
                Ok(()) => placed = !placed,
                Err(e) => log::debug!("edit at ({}, {}, {}) skipped: {}", wx, wy, wz, e),
            }
        }

        if tick % 60 == 0 {
            let s = streamer.stats();
            log::info!(
                target: "stream",
                "[tick {}] tracked={} visible={} removing={} pooled={} meshes={} rebuilds={} compute(q={} run={}) io(q={} run={})",
                s.tick,
                s.tracked,
                s.visible,
                s.removing,
                s.pooled,
                s.meshes,
                s.rebuilds,
                s.compute.queued,
                s.compute.in_flight,
                s.io.queued,
                s.io.in_flight
            );
        }

        let spent = start.elapsed();
        if spent < tick_len {
            thread::sleep(tick_len - spent);
        }
    }

    streamer.unload_all();
    let deadline = Instant::now() + Duration::from_secs(30);
    while !streamer.is_empty() {
        if Instant::now() > deadline {
            log::warn!("{} chunk(s) still busy at shutdown", streamer.stats().tracked);
            break;
        }
        streamer.update(viewer);
        thread::sleep(Duration::from_millis(1));
    }
    let s = streamer.stats();
    log::info!(
        target: "stream",
        "[tick {}] done: activated={} recycled={} rebuilds={}",
        s.tick,
        s.activated,
        s.recycled,
        s.rebuilds
    );
    pools.shutdown();
    Ok(())
}
