use serde::{Deserialize, Serialize};

/// Column position on the chunk grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub cx: i32,
    pub cz: i32,
}

impl ChunkCoord {
    #[inline]
    pub const fn new(cx: i32, cz: i32) -> Self {
        Self { cx, cz }
    }

    #[inline]
    pub fn offset(self, dx: i32, dz: i32) -> Self {
        Self {
            cx: self.cx + dx,
            cz: self.cz + dz,
        }
    }

    /// Chunk containing world column `(wx, wz)`.
    #[inline]
    pub fn from_world(wx: i32, wz: i32, chunk_size: usize) -> Self {
        let s = chunk_size as i32;
        Self {
            cx: wx.div_euclid(s),
            cz: wz.div_euclid(s),
        }
    }

    /// World position of the chunk's minimum corner.
    #[inline]
    pub fn origin(self, chunk_size: usize) -> (i32, i32) {
        let s = chunk_size as i32;
        (self.cx * s, self.cz * s)
    }

    #[inline]
    pub fn chebyshev(self, other: ChunkCoord) -> i32 {
        (self.cx - other.cx).abs().max((self.cz - other.cz).abs())
    }

    #[inline]
    pub fn manhattan(self, other: ChunkCoord) -> i32 {
        (self.cx - other.cx).abs() + (self.cz - other.cz).abs()
    }

    /// Horizontal neighbor; vertical directions return `self`.
    #[inline]
    pub fn step(self, dir: Direction) -> Self {
        let (dx, _, dz) = dir.delta();
        self.offset(dx, dz)
    }
}

impl From<(i32, i32)> for ChunkCoord {
    fn from(value: (i32, i32)) -> Self {
        Self::new(value.0, value.1)
    }
}

impl From<ChunkCoord> for (i32, i32) {
    fn from(value: ChunkCoord) -> Self {
        (value.cx, value.cz)
    }
}

/// One vertical slab of a chunk column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionId {
    pub chunk: ChunkCoord,
    pub index: u8,
}

impl SectionId {
    #[inline]
    pub const fn new(chunk: ChunkCoord, index: u8) -> Self {
        Self { chunk, index }
    }

    /// The adjacent section in `dir`, or `None` past the top or bottom of the stack.
    pub fn neighbor(self, dir: Direction, stack_height: usize) -> Option<SectionId> {
        match dir {
            Direction::NegY => self.index.checked_sub(1).map(|i| SectionId::new(self.chunk, i)),
            Direction::PosY => {
                let up = self.index as usize + 1;
                (up < stack_height).then(|| SectionId::new(self.chunk, up as u8))
            }
            _ => Some(SectionId::new(self.chunk.step(dir), self.index)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    NegX = 0,
    PosX = 1,
    NegY = 2,
    PosY = 3,
    NegZ = 4,
    PosZ = 5,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::NegX,
        Direction::PosX,
        Direction::NegY,
        Direction::PosY,
        Direction::NegZ,
        Direction::PosZ,
    ];

    pub const HORIZONTAL: [Direction; 4] = [
        Direction::NegX,
        Direction::PosX,
        Direction::NegZ,
        Direction::PosZ,
    ];

    #[inline]
    pub const fn bit(self) -> u8 {
        1 << self as u8
    }

    #[inline]
    pub const fn opposite(self) -> Direction {
        match self {
            Direction::NegX => Direction::PosX,
            Direction::PosX => Direction::NegX,
            Direction::NegY => Direction::PosY,
            Direction::PosY => Direction::NegY,
            Direction::NegZ => Direction::PosZ,
            Direction::PosZ => Direction::NegZ,
        }
    }

    #[inline]
    pub const fn delta(self) -> (i32, i32, i32) {
        match self {
            Direction::NegX => (-1, 0, 0),
            Direction::PosX => (1, 0, 0),
            Direction::NegY => (0, -1, 0),
            Direction::PosY => (0, 1, 0),
            Direction::NegZ => (0, 0, -1),
            Direction::PosZ => (0, 0, 1),
        }
    }

    /// Directions whose bits are set in `mask`.
    pub fn from_mask(mask: u8) -> impl Iterator<Item = Direction> {
        Self::ALL.into_iter().filter(move |d| mask & d.bit() != 0)
    }
}
