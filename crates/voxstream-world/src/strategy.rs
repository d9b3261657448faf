use std::sync::Arc;

use voxstream_storage::{CellKind, VoxelCell};

use crate::coord::{Direction, SectionId};
use crate::pool::Recycle;
use crate::section::SectionData;

/// Mutable flat view of one section's cells, y-major: `(y * size + z) * size + x`.
pub struct SectionCells<'a> {
    pub id: SectionId,
    /// World position of cell (0, 0, 0).
    pub origin: [i32; 3],
    pub size: usize,
    cells: &'a mut [VoxelCell],
}

impl<'a> SectionCells<'a> {
    pub fn new(id: SectionId, origin: [i32; 3], size: usize, cells: &'a mut [VoxelCell]) -> Self {
        debug_assert_eq!(cells.len(), size * size * size);
        Self {
            id,
            origin,
            size,
            cells,
        }
    }

    #[inline]
    pub fn idx(&self, x: usize, y: usize, z: usize) -> usize {
        (y * self.size + z) * self.size + x
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize, z: usize) -> VoxelCell {
        self.cells[self.idx(x, y, z)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, z: usize, cell: VoxelCell) {
        let i = self.idx(x, y, z);
        self.cells[i] = cell;
    }

    #[inline]
    pub fn cells(&self) -> &[VoxelCell] {
        self.cells
    }

    #[inline]
    pub fn cells_mut(&mut self) -> &mut [VoxelCell] {
        self.cells
    }
}

/// Fills sections with voxels. Called from compute workers.
pub trait GenerationStrategy: Send + Sync {
    /// Populate every cell of `target`.
    fn generate(&self, target: &mut SectionCells<'_>);

    /// Second pass, run once every registered neighbor has generated.
    /// Returns true if any cell changed.
    fn decorate(&self, _target: &mut SectionCells<'_>) -> bool {
        false
    }
}

/// Turns a section into renderable geometry. Called from compute workers.
pub trait GeometryBuilder: Send + Sync {
    /// `min` is inclusive, `max` exclusive, both in world coordinates.
    fn build_mesh(
        &self,
        world: &MeshContext<'_>,
        out: &mut MeshBuffer,
        min: [i32; 3],
        max: [i32; 3],
        lod: u8,
    );
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: Direction,
    pub kind: CellKind,
}

#[derive(Clone, Debug, Default)]
pub struct MeshBuffer {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshBuffer {
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.indices.clear();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Append a quad given counter-clockwise corners.
    pub fn push_quad(&mut self, corners: [[f32; 3]; 4], normal: Direction, kind: CellKind) {
        let base = self.vertices.len() as u32;
        for position in corners {
            self.vertices.push(Vertex {
                position,
                normal,
                kind,
            });
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    pub fn quad_count(&self) -> usize {
        self.indices.len() / 6
    }
}

/// Read-only voxel access for a geometry builder: the section's own cells plus a
/// lookup into the six face neighbors for cells just past its bounds.
pub struct MeshContext<'a> {
    pub id: SectionId,
    pub origin: [i32; 3],
    pub size: usize,
    cells: &'a [VoxelCell],
    neighbors: &'a [Option<Arc<SectionData>>; 6],
    outside: VoxelCell,
}

impl<'a> MeshContext<'a> {
    pub fn new(
        id: SectionId,
        origin: [i32; 3],
        size: usize,
        cells: &'a [VoxelCell],
        neighbors: &'a [Option<Arc<SectionData>>; 6],
    ) -> Self {
        Self {
            id,
            origin,
            size,
            cells,
            neighbors,
            outside: VoxelCell::AIR,
        }
    }

    /// Cell to report where no neighbor is loaded.
    pub fn with_outside(mut self, cell: VoxelCell) -> Self {
        self.outside = cell;
        self
    }

    /// Cell at section-local `(x, y, z)`; coordinates one step outside resolve through the
    /// matching face neighbor. Edge and corner positions report the outside cell.
    pub fn cell(&self, x: i32, y: i32, z: i32) -> VoxelCell {
        let s = self.size as i32;
        let mut dir = None;
        let mut outs = 0;
        for (v, neg, pos) in [
            (x, Direction::NegX, Direction::PosX),
            (y, Direction::NegY, Direction::PosY),
            (z, Direction::NegZ, Direction::PosZ),
        ] {
            if v < 0 {
                dir = Some(neg);
                outs += 1;
            } else if v >= s {
                dir = Some(pos);
                outs += 1;
            }
        }
        let local = |v: i32| v.rem_euclid(s) as usize;
        let i = (local(y) * self.size + local(z)) * self.size + local(x);
        match (outs, dir) {
            (0, _) => self.cells[i],
            (1, Some(d)) => match &self.neighbors[d as usize] {
                Some(data) => data.read_cells().get(i),
                None => self.outside,
            },
            _ => self.outside,
        }
    }

    #[inline]
    pub fn cell_world(&self, wx: i32, wy: i32, wz: i32) -> VoxelCell {
        self.cell(
            wx - self.origin[0],
            wy - self.origin[1],
            wz - self.origin[2],
        )
    }
}

/// Committed geometry for one section, held in the mesh slot pool.
#[derive(Debug, Default)]
pub struct RenderMesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub owner: Option<SectionId>,
    pub lod: u8,
}

impl RenderMesh {
    pub fn with_capacity(vertices: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertices),
            indices: Vec::with_capacity(vertices / 4 * 6),
            owner: None,
            lod: 0,
        }
    }

    pub fn upload(&mut self, owner: SectionId, lod: u8, buf: &MeshBuffer) {
        self.vertices.clear();
        self.vertices.extend_from_slice(&buf.vertices);
        self.indices.clear();
        self.indices.extend_from_slice(&buf.indices);
        self.owner = Some(owner);
        self.lod = lod;
    }
}

impl Recycle for RenderMesh {
    fn reset(&mut self) {
        self.vertices.clear();
        self.indices.clear();
        self.owner = None;
        self.lod = 0;
    }
}
