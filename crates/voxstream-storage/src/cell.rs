use std::io::{self, Read, Write};

use crate::codec::{BinaryCodec, CodecError};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum CellKind {
    #[default]
    Air = 0,
    Bedrock = 1,
    Stone = 2,
    Dirt = 3,
    Grass = 4,
    Sand = 5,
    Water = 6,
    Wood = 7,
    Leaves = 8,
}

impl CellKind {
    pub const ALL: [CellKind; 9] = [
        CellKind::Air,
        CellKind::Bedrock,
        CellKind::Stone,
        CellKind::Dirt,
        CellKind::Grass,
        CellKind::Sand,
        CellKind::Water,
        CellKind::Wood,
        CellKind::Leaves,
    ];

    #[inline]
    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        matches!(self, CellKind::Air)
    }

    /// Opaque cells hide the faces of their neighbors.
    #[inline]
    pub const fn is_opaque(self) -> bool {
        !matches!(self, CellKind::Air | CellKind::Water | CellKind::Leaves)
    }

    pub const fn name(self) -> &'static str {
        match self {
            CellKind::Air => "air",
            CellKind::Bedrock => "bedrock",
            CellKind::Stone => "stone",
            CellKind::Dirt => "dirt",
            CellKind::Grass => "grass",
            CellKind::Sand => "sand",
            CellKind::Water => "water",
            CellKind::Wood => "wood",
            CellKind::Leaves => "leaves",
        }
    }
}

/// A single voxel: a kind plus one packed byte (low nibble metadata, high nibble damage).
///
/// Equality looks at the kind only. Run compression, `RunList::set` no-op detection and
/// queued mutation dedupe all inherit that, so two cells differing only in metadata or
/// damage are interchangeable as far as storage is concerned. Use [`VoxelCell::same_bits`]
/// for an exact comparison.
#[derive(Clone, Copy, Debug, Default)]
pub struct VoxelCell {
    pub kind: CellKind,
    packed: u8,
}

impl VoxelCell {
    pub const AIR: VoxelCell = VoxelCell::new(CellKind::Air);

    #[inline]
    pub const fn new(kind: CellKind) -> Self {
        Self { kind, packed: 0 }
    }

    #[inline]
    pub const fn with_bits(kind: CellKind, meta: u8, damage: u8) -> Self {
        Self {
            kind,
            packed: (meta & 0x0F) | ((damage & 0x0F) << 4),
        }
    }

    #[inline]
    pub const fn from_packed(kind: CellKind, packed: u8) -> Self {
        Self { kind, packed }
    }

    #[inline]
    pub const fn meta(self) -> u8 {
        self.packed & 0x0F
    }

    #[inline]
    pub const fn damage(self) -> u8 {
        self.packed >> 4
    }

    #[inline]
    pub const fn packed(self) -> u8 {
        self.packed
    }

    #[inline]
    pub const fn with_damage(self, damage: u8) -> Self {
        Self::with_bits(self.kind, self.meta(), damage)
    }

    #[inline]
    pub const fn with_meta(self, meta: u8) -> Self {
        Self::with_bits(self.kind, meta, self.damage())
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.kind.is_empty()
    }

    #[inline]
    pub fn same_bits(self, other: VoxelCell) -> bool {
        self.kind == other.kind && self.packed == other.packed
    }
}

impl PartialEq for VoxelCell {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for VoxelCell {}

impl From<CellKind> for VoxelCell {
    fn from(kind: CellKind) -> Self {
        VoxelCell::new(kind)
    }
}

impl BinaryCodec for VoxelCell {
    fn encode<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&[self.kind as u8, self.packed])
    }

    fn decode<R: Read>(input: &mut R) -> Result<Self, CodecError> {
        let mut buf = [0u8; 2];
        input.read_exact(&mut buf)?;
        let kind = CellKind::from_u8(buf[0]).ok_or(CodecError::UnknownKind(buf[0]))?;
        Ok(VoxelCell::from_packed(kind, buf[1]))
    }
}
