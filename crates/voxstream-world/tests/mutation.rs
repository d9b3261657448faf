mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FlatGenerator, TopFaces, all_synced, config, run_until};
use voxstream_runtime::PoolRegistry;
use voxstream_storage::{CellKind, VoxelCell};
use voxstream_world::{ChunkCoord, ChunkStreamer, EditError, SectionId};

const VIEWER: [f32; 3] = [2.0, 0.0, 2.0];

fn settled_world() -> ChunkStreamer {
    let mut streamer = ChunkStreamer::new(
        config(4, 1, 1, 1),
        Arc::new(PoolRegistry::inline()),
        Arc::new(FlatGenerator::new(2)),
        Arc::new(TopFaces::default()),
    )
    .unwrap();
    run_until(&mut streamer, VIEWER, Duration::from_secs(5), all_synced);
    // let the first geometry pass land
    for _ in 0..3 {
        streamer.update(VIEWER);
    }
    streamer
}

fn rebuilds(streamer: &ChunkStreamer, cx: i32, cz: i32) -> u64 {
    streamer
        .section(SectionId::new(ChunkCoord::new(cx, cz), 0))
        .unwrap()
        .rebuilds_received()
}

#[test]
fn boundary_edits_rebuild_the_neighbor_once() {
    let mut streamer = settled_world();
    let east = rebuilds(&streamer, 1, 0);
    let west = rebuilds(&streamer, -1, 0);
    let own = rebuilds(&streamer, 0, 0);
    let before = streamer.stats().rebuilds;

    let stone = VoxelCell::new(CellKind::Stone);
    for (y, z) in [(2, 1), (3, 1), (2, 2)] {
        streamer.set_cell(3, y, z, stone).unwrap();
    }
    streamer.update(VIEWER);

    assert_eq!(rebuilds(&streamer, 1, 0), east + 1);
    assert_eq!(rebuilds(&streamer, -1, 0), west);
    assert_eq!(rebuilds(&streamer, 0, 0), own + 1);
    assert_eq!(streamer.stats().rebuilds, before + 2);
    assert_eq!(streamer.get_cell(3, 3, 1).unwrap().kind, CellKind::Stone);

    let center = streamer.chunk(ChunkCoord::new(0, 0)).unwrap();
    assert!(center.shared().is_modified());
    assert_eq!(center.sections()[0].data().non_empty(), 2 * 16 + 3);
}

#[test]
fn unchanged_cells_do_not_rebuild() {
    let mut streamer = settled_world();
    let own = rebuilds(&streamer, 0, 0);
    streamer
        .set_cell(1, 0, 1, VoxelCell::new(CellKind::Stone).with_damage(4))
        .unwrap();
    streamer.update(VIEWER);
    assert_eq!(rebuilds(&streamer, 0, 0), own);
    assert!(!streamer.chunk(ChunkCoord::new(0, 0)).unwrap().shared().is_modified());
}

#[test]
fn duplicate_edits_collapse() {
    let mut streamer = settled_world();
    let stone = VoxelCell::new(CellKind::Stone);
    streamer.set_cell(1, 3, 1, stone).unwrap();
    streamer.set_cell(1, 3, 1, stone.with_meta(2)).unwrap();
    let queued = streamer
        .section(SectionId::new(ChunkCoord::new(0, 0), 0))
        .unwrap()
        .queued_mutations();
    assert_eq!(queued, 1);
}

fn center_non_empty(streamer: &ChunkStreamer) -> u32 {
    streamer.chunk(ChunkCoord::new(0, 0)).unwrap().sections()[0].data().non_empty()
}

#[test]
fn last_write_to_a_cell_wins_after_a_revert() {
    let mut streamer = settled_world();
    let stone = VoxelCell::new(CellKind::Stone);
    let dirt = VoxelCell::new(CellKind::Dirt);
    for cell in [stone, dirt, stone] {
        streamer.set_cell(1, 3, 1, cell).unwrap();
    }
    let queued = streamer
        .section(SectionId::new(ChunkCoord::new(0, 0), 0))
        .unwrap()
        .queued_mutations();
    assert_eq!(queued, 3);

    streamer.update(VIEWER);
    assert_eq!(streamer.get_cell(1, 3, 1).unwrap().kind, CellKind::Stone);
    assert_eq!(center_non_empty(&streamer), 2 * 16 + 1);
}

#[test]
fn later_write_replaces_an_earlier_one() {
    let mut streamer = settled_world();
    streamer.set_cell(1, 3, 1, VoxelCell::new(CellKind::Stone)).unwrap();
    streamer.set_cell(1, 3, 1, VoxelCell::new(CellKind::Dirt)).unwrap();
    streamer.set_cell(2, 1, 2, VoxelCell::new(CellKind::Dirt)).unwrap();
    streamer.set_cell(2, 1, 2, VoxelCell::AIR).unwrap();
    streamer.update(VIEWER);

    assert_eq!(streamer.get_cell(1, 3, 1).unwrap().kind, CellKind::Dirt);
    assert!(streamer.get_cell(2, 1, 2).unwrap().is_empty());
    assert_eq!(center_non_empty(&streamer), 2 * 16 + 1 - 1);
}

#[test]
fn edits_outside_the_world_are_rejected() {
    let mut streamer = settled_world();
    let stone = VoxelCell::new(CellKind::Stone);
    assert_eq!(
        streamer.set_cell(100, 1, 1, stone),
        Err(EditError::ChunkNotLoaded(ChunkCoord::new(25, 0)))
    );
    assert_eq!(
        streamer.set_cell(1, 4, 1, stone),
        Err(EditError::OutOfBounds { y: 4, height: 4 })
    );
    assert!(matches!(streamer.get_cell(1, -1, 1), Err(EditError::OutOfBounds { .. })));
}
