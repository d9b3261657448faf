//! Noise heightmap terrain with scattered trees.
#![forbid(unsafe_code)]

use fastnoise_lite::{FastNoiseLite, NoiseType};
use voxstream_storage::{CellKind, VoxelCell};
use voxstream_world::{GenerationStrategy, SectionCells};

#[derive(Clone, Debug, PartialEq)]
pub struct TerrainParams {
    pub base_height: f32,
    pub amplitude: f32,
    pub frequency: f32,
    pub sea_level: i32,
    pub dirt_depth: i32,
    pub tree_probability: f32,
    pub trunk_min: i32,
    pub trunk_max: i32,
    pub leaf_radius: i32,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            base_height: 40.0,
            amplitude: 18.0,
            frequency: 0.01,
            sea_level: 34,
            dirt_depth: 3,
            tree_probability: 0.02,
            trunk_min: 4,
            trunk_max: 6,
            leaf_radius: 2,
        }
    }
}

pub struct NoiseTerrain {
    seed: i32,
    params: TerrainParams,
    height: FastNoiseLite,
    warp: FastNoiseLite,
}

impl NoiseTerrain {
    pub fn new(seed: i32, params: TerrainParams) -> Self {
        let mut height = FastNoiseLite::with_seed(seed);
        height.set_noise_type(Some(NoiseType::OpenSimplex2));
        height.set_frequency(Some(params.frequency));
        let mut warp = FastNoiseLite::with_seed(seed ^ 99_173);
        warp.set_noise_type(Some(NoiseType::OpenSimplex2));
        warp.set_frequency(Some(0.012));
        Self {
            seed,
            params,
            height,
            warp,
        }
    }

    #[inline]
    pub fn params(&self) -> &TerrainParams {
        &self.params
    }

    /// Number of solid cells in column `(wx, wz)`; the surface cell sits at `height - 1`.
    pub fn height_at(&self, wx: i32, wz: i32) -> i32 {
        let (x, z) = (wx as f32, wz as f32);
        let wx_off = self.warp.get_noise_2d(x, z) * 8.0;
        let wz_off = self.warp.get_noise_2d(x + 1000.0, z - 1000.0) * 8.0;
        let n = self.height.get_noise_2d(x + wx_off, z + wz_off);
        (self.params.base_height + n * self.params.amplitude).round().max(1.0) as i32
    }

    /// Kind of the cell at `wy` in a column of `height` solid cells, before decoration.
    pub fn base_cell(&self, wy: i32, height: i32) -> CellKind {
        let p = &self.params;
        let surface = height - 1;
        if wy == 0 {
            CellKind::Bedrock
        } else if wy < surface - p.dirt_depth {
            CellKind::Stone
        } else if wy < surface {
            CellKind::Dirt
        } else if wy == surface {
            if surface <= p.sea_level + 1 {
                CellKind::Sand
            } else {
                CellKind::Grass
            }
        } else if wy <= p.sea_level {
            CellKind::Water
        } else {
            CellKind::Air
        }
    }

    fn rand01(&self, ix: i32, iz: i32, salt: u32) -> f32 {
        let h = hash2(ix, iz, ((self.seed as u32) ^ salt).wrapping_add(0x9E37_79B9));
        ((h & 0x00FF_FFFF) as f32) / 16_777_216.0
    }

    /// Surface y and trunk height of a tree rooted in column `(tx, tz)`, if any.
    pub fn tree_at(&self, tx: i32, tz: i32) -> Option<(i32, i32)> {
        let p = &self.params;
        let surface = self.height_at(tx, tz) - 1;
        if self.base_cell(surface, surface + 1) != CellKind::Grass {
            return None;
        }
        if self.rand01(tx, tz, 0xA53F9) >= p.tree_probability {
            return None;
        }
        let span = (p.trunk_max - p.trunk_min).max(0) as u32;
        let trunk = p.trunk_min + (hash2(tx, tz, 0x0051_F0A7) % (span + 1)) as i32;
        Some((surface, trunk))
    }
}

fn hash2(ix: i32, iz: i32, seed: u32) -> u32 {
    let mut h = (ix as u32).wrapping_mul(0x85eb_ca6b)
        ^ (iz as u32).wrapping_mul(0xc2b2_ae35)
        ^ seed.wrapping_mul(0x27d4_eb2d);
    h ^= h >> 16;
    h = h.wrapping_mul(0x7feb_352d);
    h ^= h >> 15;
    h = h.wrapping_mul(0x846c_a68b);
    h ^= h >> 16;
    h
}

impl GenerationStrategy for NoiseTerrain {
    fn generate(&self, target: &mut SectionCells<'_>) {
        let size = target.size;
        let [ox, oy, oz] = target.origin;
        for z in 0..size {
            for x in 0..size {
                let height = self.height_at(ox + x as i32, oz + z as i32);
                for y in 0..size {
                    let kind = self.base_cell(oy + y as i32, height);
                    target.set(x, y, z, VoxelCell::new(kind));
                }
            }
        }
    }

    /// Trees are rooted per column, so every section paints its own share of trunks and
    /// canopies that start in neighboring columns.
    fn decorate(&self, target: &mut SectionCells<'_>) -> bool {
        let size = target.size as i32;
        let [ox, oy, oz] = target.origin;
        let r = self.params.leaf_radius;
        let mut changed = false;
        for tz in (oz - r)..(oz + size + r) {
            for tx in (ox - r)..(ox + size + r) {
                let Some((surface, trunk)) = self.tree_at(tx, tz) else {
                    continue;
                };
                let top = surface + trunk;
                if top + 2 < oy || surface + 1 >= oy + size {
                    continue;
                }
                for wy in (top - 2)..=(top + 2) {
                    let rad = if (wy - top).abs() == 2 { r - 1 } else { r };
                    for wz in (tz - rad)..=(tz + rad) {
                        for wx in (tx - rad)..=(tx + rad) {
                            let (lx, ly, lz) = (wx - ox, wy - oy, wz - oz);
                            if !(0..size).contains(&lx) || !(0..size).contains(&ly) || !(0..size).contains(&lz) {
                                continue;
                            }
                            let (lx, ly, lz) = (lx as usize, ly as usize, lz as usize);
                            if target.get(lx, ly, lz).is_empty() {
                                target.set(lx, ly, lz, VoxelCell::new(CellKind::Leaves));
                                changed = true;
                            }
                        }
                    }
                }
                if !(ox..ox + size).contains(&tx) || !(oz..oz + size).contains(&tz) {
                    continue;
                }
                for wy in (surface + 1)..=top {
                    let ly = wy - oy;
                    if (0..size).contains(&ly) {
                        target.set((tx - ox) as usize, ly as usize, (tz - oz) as usize, VoxelCell::new(CellKind::Wood));
                        changed = true;
                    }
                }
            }
        }
        changed
    }
}
