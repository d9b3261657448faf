mod common;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use common::{Event, FlatGenerator, TopFaces, all_synced, config, run_until};
use voxstream_runtime::PoolRegistry;
use voxstream_world::{ChunkCoord, ChunkStreamer, SectionId};

const VIEWER: [f32; 3] = [2.0, 0.0, 2.0];

fn positions(events: &[Event]) -> (HashMap<SectionId, usize>, HashMap<SectionId, Vec<usize>>) {
    let mut generated = HashMap::new();
    let mut decorated: HashMap<SectionId, Vec<usize>> = HashMap::new();
    for (i, e) in events.iter().enumerate() {
        match *e {
            Event::Generate(id) => {
                assert!(generated.insert(id, i).is_none(), "{id:?} generated twice");
            }
            Event::Decorate(id) => decorated.entry(id).or_default().push(i),
        }
    }
    (generated, decorated)
}

#[test]
fn blueprints_follow_every_registered_neighbor() {
    let mut cfg = config(4, 3, 1, 1);
    cfg.threading.multithreading = true;
    cfg.threading.compute_threads = 3;
    let pools = Arc::new(PoolRegistry::new(&cfg.runtime()).unwrap());
    let generator = Arc::new(FlatGenerator::jittered(5));
    let mut streamer = ChunkStreamer::new(cfg, pools.clone(), generator.clone(), Arc::new(TopFaces::default())).unwrap();

    run_until(&mut streamer, VIEWER, Duration::from_secs(20), all_synced);

    let (generated, decorated) = positions(&generator.events());
    let mut seen_counts = BTreeSet::new();
    for chunk in streamer.chunks() {
        for section in chunk.sections() {
            let id = section.id();
            let runs = &decorated[&id];
            assert_eq!(runs.len(), 1, "{id:?} decorated {} times", runs.len());
            for n in section.neighbors().iter() {
                assert!(
                    generated[&n] < runs[0],
                    "{id:?} decorated before neighbor {n:?} generated"
                );
            }
            seen_counts.insert(section.neighbors().registered());
        }
    }
    for expected in [4, 5, 6] {
        assert!(seen_counts.contains(&expected), "no section with {expected} neighbors");
    }
    assert_eq!(generated.len(), 27);
    pools.shutdown();
}

#[test]
fn center_column_is_fully_subscribed() {
    let cfg = config(4, 3, 1, 1);
    let mut streamer = ChunkStreamer::new(
        cfg,
        Arc::new(PoolRegistry::inline()),
        Arc::new(FlatGenerator::new(5)),
        Arc::new(TopFaces::default()),
    )
    .unwrap();
    run_until(&mut streamer, VIEWER, Duration::from_secs(5), all_synced);

    let center = streamer.chunk(ChunkCoord::new(0, 0)).unwrap();
    let registered: Vec<usize> = center.sections().iter().map(|s| s.neighbors().registered()).collect();
    assert_eq!(registered, vec![5, 6, 5]);
    assert!(center.sections().iter().all(|s| s.neighbors().is_full()));
}

#[test]
fn trickled_admission_still_decorates_once() {
    let mut cfg = config(4, 1, 2, 2);
    cfg.streaming.max_new_chunks_per_tick = 1;
    let generator = Arc::new(FlatGenerator::new(3));
    let mut streamer = ChunkStreamer::new(
        cfg,
        Arc::new(PoolRegistry::inline()),
        generator.clone(),
        Arc::new(TopFaces::default()),
    )
    .unwrap();
    run_until(&mut streamer, VIEWER, Duration::from_secs(5), |s| {
        s.stats().tracked == 25 && all_synced(s)
    });

    let (generated, decorated) = positions(&generator.events());
    assert_eq!(generated.len(), 25);
    assert!(decorated.values().all(|runs| runs.len() == 1));
    let corner = streamer.chunk(ChunkCoord::new(2, 2)).unwrap();
    assert_eq!(corner.sections()[0].neighbors().registered(), 2);
}
