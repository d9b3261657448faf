use voxstream_storage::VoxelCell;

use crate::coord::{Direction, SectionId};

/// A queued cell write. Two writes are the same edit when they target the same cell with
/// the same cell kind; a repeat only collapses into the latest write queued for that cell.
#[derive(Clone, Copy, Debug)]
pub struct CellMutation {
    pub section: SectionId,
    pub index: usize,
    pub cell: VoxelCell,
    /// Directions whose neighbor sections see this cell on their border.
    pub boundary: u8,
}

impl CellMutation {
    pub fn new(section: SectionId, local: [usize; 3], cell: VoxelCell, size: usize, stack_height: usize) -> Self {
        let [x, y, z] = local;
        debug_assert!(x < size && y < size && z < size);
        Self {
            section,
            index: (y * size + z) * size + x,
            cell,
            boundary: boundary_mask(section, local, size, stack_height),
        }
    }
}

impl PartialEq for CellMutation {
    fn eq(&self, other: &Self) -> bool {
        self.section == other.section && self.index == other.index && self.cell == other.cell
    }
}

/// Faces of the section a local position touches; the top and bottom of the column have no
/// section beyond them.
pub fn boundary_mask(section: SectionId, local: [usize; 3], size: usize, stack_height: usize) -> u8 {
    let last = size - 1;
    let [x, y, z] = local;
    let mut mask = 0;
    if x == 0 {
        mask |= Direction::NegX.bit();
    }
    if x == last {
        mask |= Direction::PosX.bit();
    }
    if z == 0 {
        mask |= Direction::NegZ.bit();
    }
    if z == last {
        mask |= Direction::PosZ.bit();
    }
    if y == 0 && section.index > 0 {
        mask |= Direction::NegY.bit();
    }
    if y == last && (section.index as usize) + 1 < stack_height {
        mask |= Direction::PosY.bit();
    }
    mask
}
