use criterion::{Criterion, black_box, criterion_group, criterion_main};

use voxstream_storage::{CellKind, RunList, VoxelCell};

const SIDE: usize = 16;
const VOLUME: usize = SIDE * SIDE * SIDE;

// Layered column: bedrock, stone, dirt, grass, then air.
fn layered() -> Vec<VoxelCell> {
    (0..VOLUME)
        .map(|i| {
            let y = i / (SIDE * SIDE);
            let kind = match y {
                0 => CellKind::Bedrock,
                1..=6 => CellKind::Stone,
                7..=8 => CellKind::Dirt,
                9 => CellKind::Grass,
                _ => CellKind::Air,
            };
            VoxelCell::new(kind)
        })
        .collect()
}

fn bench_compress(c: &mut Criterion) {
    let data = layered();
    c.bench_function("runlist_compress_layered", |b| {
        b.iter(|| RunList::compress(black_box(&data)))
    });
}

fn bench_decompress_into(c: &mut Criterion) {
    let list = RunList::compress(&layered());
    let mut out = vec![VoxelCell::AIR; VOLUME];
    c.bench_function("runlist_decompress_into", |b| {
        b.iter(|| list.decompress_into(black_box(&mut out)))
    });
}

fn bench_scattered_sets(c: &mut Criterion) {
    let base = RunList::compress(&layered());
    c.bench_function("runlist_scattered_sets", |b| {
        b.iter(|| {
            let mut list = base.clone();
            for i in (0..VOLUME).step_by(97) {
                list.set(i, VoxelCell::new(CellKind::Wood));
            }
            black_box(list.run_count())
        })
    });
}

criterion_group!(
    benches,
    bench_compress,
    bench_decompress_into,
    bench_scattered_sets
);
criterion_main!(benches);
