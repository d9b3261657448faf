//! Hidden-face culling mesher over the section neighbor query.
#![forbid(unsafe_code)]

use voxstream_storage::VoxelCell;
use voxstream_world::{Direction, GeometryBuilder, MeshBuffer, MeshContext};

/// Emits one quad per cell face that borders a non-opaque cell of a different kind.
/// At LOD `n` cells are sampled every `2^n` and emitted as `2^n`-sized cubes.
#[derive(Clone, Copy, Debug, Default)]
pub struct FaceMesher;

impl FaceMesher {
    #[inline]
    fn face_visible(cell: VoxelCell, neighbor: VoxelCell) -> bool {
        !neighbor.kind.is_opaque() && neighbor.kind != cell.kind
    }
}

/// Unit-cube corners of each face, counter-clockwise seen from outside.
fn face_corners(dir: Direction) -> [[f32; 3]; 4] {
    match dir {
        Direction::NegX => [[0., 0., 0.], [0., 0., 1.], [0., 1., 1.], [0., 1., 0.]],
        Direction::PosX => [[1., 0., 1.], [1., 0., 0.], [1., 1., 0.], [1., 1., 1.]],
        Direction::NegY => [[0., 0., 0.], [1., 0., 0.], [1., 0., 1.], [0., 0., 1.]],
        Direction::PosY => [[0., 1., 1.], [1., 1., 1.], [1., 1., 0.], [0., 1., 0.]],
        Direction::NegZ => [[1., 0., 0.], [0., 0., 0.], [0., 1., 0.], [1., 1., 0.]],
        Direction::PosZ => [[0., 0., 1.], [1., 0., 1.], [1., 1., 1.], [0., 1., 1.]],
    }
}

impl GeometryBuilder for FaceMesher {
    fn build_mesh(&self, world: &MeshContext<'_>, out: &mut MeshBuffer, min: [i32; 3], max: [i32; 3], lod: u8) {
        let size = world.size as i32;
        let step = (1i32 << lod).min(size).max(1);
        let scale = step as f32;
        for wy in (min[1]..max[1]).step_by(step as usize) {
            for wz in (min[2]..max[2]).step_by(step as usize) {
                for wx in (min[0]..max[0]).step_by(step as usize) {
                    let cell = world.cell_world(wx, wy, wz);
                    if cell.is_empty() {
                        continue;
                    }
                    for dir in Direction::ALL {
                        let (dx, dy, dz) = dir.delta();
                        let neighbor = world.cell_world(wx + dx * step, wy + dy * step, wz + dz * step);
                        if !Self::face_visible(cell, neighbor) {
                            continue;
                        }
                        let corners = face_corners(dir).map(|[x, y, z]| {
                            [
                                wx as f32 + x * scale,
                                wy as f32 + y * scale,
                                wz as f32 + z * scale,
                            ]
                        });
                        out.push_quad(corners, dir, cell.kind);
                    }
                }
            }
        }
    }
}
