//! Integer coordinates for blocks, chunks, and regions.
//!
//! A chunk is a cube of `2^CHUNK_BITS` blocks per axis and a region is a
//! cube of `2^REGION_CHUNK_BITS` chunks per axis. Conversions use arithmetic
//! shifts so negative coordinates floor toward negative infinity, and the
//! local part of a coordinate is always the low bits.

use serde::{Deserialize, Serialize};

/// Bits of block coordinate covered by one chunk.
pub const CHUNK_BITS: u32 = 4;

/// Blocks along one axis of a chunk.
pub const BLOCKS_PER_CHUNK_AXIS: u32 = 1 << CHUNK_BITS;

/// Bits of chunk coordinate covered by one region.
pub const REGION_CHUNK_BITS: u32 = 4;

/// Chunks along one axis of a region.
pub const CHUNKS_PER_REGION_AXIS: u32 = 1 << REGION_CHUNK_BITS;

/// Number of chunk slots in a region (one storage segment chain per slot).
pub const REGION_CHUNK_VOLUME: usize = 1 << (3 * REGION_CHUNK_BITS);

const REGION_MASK: i32 = (1 << REGION_CHUNK_BITS) - 1;
const CHUNK_MASK: i32 = (1 << CHUNK_BITS) - 1;

/// Coordinate of a region, in region units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RegionCoord {
    /// Region x.
    pub x: i32,
    /// Region y.
    pub y: i32,
    /// Region z.
    pub z: i32,
}

impl RegionCoord {
    /// Build a region coordinate.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// File name of the region container, e.g. `reg0_-1_2.spr`.
    pub fn file_name(&self) -> String {
        format!("reg{}_{}_{}.spr", self.x, self.y, self.z)
    }

    /// The chunk at local slot `slot` of this region.
    ///
    /// Slots outside `0..REGION_CHUNK_VOLUME` wrap into range.
    pub fn chunk_at(&self, slot: usize) -> ChunkCoord {
        let slot = u32::try_from(slot).unwrap_or_default();
        let mask = CHUNKS_PER_REGION_AXIS.wrapping_sub(1);
        let lx = slot.wrapping_shr(2 * REGION_CHUNK_BITS) & mask;
        let ly = slot.wrapping_shr(REGION_CHUNK_BITS) & mask;
        let lz = slot & mask;
        ChunkCoord::new(
            self.x.wrapping_shl(REGION_CHUNK_BITS) | i32::try_from(lx).unwrap_or_default(),
            self.y.wrapping_shl(REGION_CHUNK_BITS) | i32::try_from(ly).unwrap_or_default(),
            self.z.wrapping_shl(REGION_CHUNK_BITS) | i32::try_from(lz).unwrap_or_default(),
        )
    }
}

impl core::fmt::Display for RegionCoord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Coordinate of a chunk, in chunk units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkCoord {
    /// Chunk x.
    pub x: i32,
    /// Chunk y.
    pub y: i32,
    /// Chunk z.
    pub z: i32,
}

impl ChunkCoord {
    /// Build a chunk coordinate.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The region containing this chunk.
    pub const fn region(&self) -> RegionCoord {
        RegionCoord::new(
            self.x >> REGION_CHUNK_BITS,
            self.y >> REGION_CHUNK_BITS,
            self.z >> REGION_CHUNK_BITS,
        )
    }

    /// Index of this chunk's slot inside its region, in `0..REGION_CHUNK_VOLUME`.
    pub fn slot(&self) -> usize {
        let lx = (self.x & REGION_MASK).unsigned_abs();
        let ly = (self.y & REGION_MASK).unsigned_abs();
        let lz = (self.z & REGION_MASK).unsigned_abs();
        let key = lx.wrapping_shl(2 * REGION_CHUNK_BITS) | ly.wrapping_shl(REGION_CHUNK_BITS) | lz;
        usize::try_from(key).unwrap_or_default()
    }

    /// World-space y of the lowest block layer in this chunk.
    pub const fn base_block_y(&self) -> i32 {
        self.y.wrapping_shl(CHUNK_BITS)
    }
}

impl core::fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[{}, {}, {}]", self.x, self.y, self.z)
    }
}

/// Coordinate of a single block, in block units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockCoord {
    /// Block x.
    pub x: i32,
    /// Block y.
    pub y: i32,
    /// Block z.
    pub z: i32,
}

impl BlockCoord {
    /// Build a block coordinate.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The chunk containing this block.
    pub const fn chunk(&self) -> ChunkCoord {
        ChunkCoord::new(
            self.x >> CHUNK_BITS,
            self.y >> CHUNK_BITS,
            self.z >> CHUNK_BITS,
        )
    }

    /// Index of this block inside its chunk's block array (x-major, then y, then z).
    pub fn local_index(&self) -> usize {
        let lx = (self.x & CHUNK_MASK).unsigned_abs();
        let ly = (self.y & CHUNK_MASK).unsigned_abs();
        let lz = (self.z & CHUNK_MASK).unsigned_abs();
        let key = lx.wrapping_shl(2 * CHUNK_BITS) | ly.wrapping_shl(CHUNK_BITS) | lz;
        usize::try_from(key).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_chunks_floor_into_lower_region() {
        let chunk = ChunkCoord::new(-1, 0, 16);
        assert_eq!(chunk.region(), RegionCoord::new(-1, 0, 1));
    }

    #[test]
    fn slot_uses_low_bits_only() {
        let a = ChunkCoord::new(1, 2, 3);
        let b = ChunkCoord::new(17, 18, 19);
        assert_eq!(a.slot(), b.slot());
        assert_eq!(a.slot(), (1 << 8) | (2 << 4) | 3);
    }

    #[test]
    fn chunk_at_inverts_slot() {
        let region = RegionCoord::new(-2, 0, 5);
        for slot in [0, 1, 17, 300, REGION_CHUNK_VOLUME - 1] {
            let chunk = region.chunk_at(slot);
            assert_eq!(chunk.region(), region);
            assert_eq!(chunk.slot(), slot);
        }
    }

    #[test]
    fn region_file_name_format() {
        assert_eq!(RegionCoord::new(0, -1, 12).file_name(), "reg0_-1_12.spr");
    }

    #[test]
    fn block_to_chunk_floors() {
        let block = BlockCoord::new(-1, 15, 16);
        assert_eq!(block.chunk(), ChunkCoord::new(-1, 0, 1));
        assert_eq!(BlockCoord::new(-1, 0, 0).local_index(), 15 << 8);
    }
}
