//! Chunk block storage and its on-disk encoding.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use tessera_types::{BlockCoord, ChunkCoord};

use crate::error::WorldError;

/// Block type identifier. `0` is air.
pub type BlockId = u16;

/// The empty block.
pub const AIR: BlockId = 0;

/// Blocks in one chunk.
pub const CHUNK_VOLUME: usize = 1 << (3 * tessera_types::CHUNK_BITS);

/// Version byte leading every encoded chunk.
const CHUNK_FORMAT_VERSION: u8 = 1;

const TAG_UNIFORM: u8 = 0;
const TAG_FULL: u8 = 1;

/// A cube of blocks with a dirty flag tracking unsaved changes.
#[derive(Debug)]
pub struct Chunk {
    coord: ChunkCoord,
    blocks: RwLock<Box<[BlockId]>>,
    dirty: AtomicBool,
}

impl Chunk {
    /// A chunk where every block is `block`.
    pub fn filled(coord: ChunkCoord, block: BlockId) -> Self {
        Self {
            coord,
            blocks: RwLock::new(vec![block; CHUNK_VOLUME].into_boxed_slice()),
            dirty: AtomicBool::new(false),
        }
    }

    /// A chunk of air.
    pub fn empty(coord: ChunkCoord) -> Self {
        Self::filled(coord, AIR)
    }

    /// Coordinate of this chunk.
    pub const fn coord(&self) -> ChunkCoord {
        self.coord
    }

    /// Block at `block`, which must lie in this chunk.
    pub fn get_block(&self, block: BlockCoord) -> Option<BlockId> {
        if block.chunk() != self.coord {
            return None;
        }
        self.blocks.read().get(block.local_index()).copied()
    }

    /// Set the block at `block` and mark the chunk dirty.
    ///
    /// Returns the previous block, or `None` if `block` is outside this chunk.
    pub fn set_block(&self, block: BlockCoord, id: BlockId) -> Option<BlockId> {
        if block.chunk() != self.coord {
            return None;
        }
        let mut blocks = self.blocks.write();
        let cell = blocks.get_mut(block.local_index())?;
        let previous = std::mem::replace(cell, id);
        if previous != id {
            self.dirty.store(true, Ordering::Release);
        }
        Some(previous)
    }

    /// Number of non-air blocks.
    pub fn solid_count(&self) -> usize {
        self.blocks.read().iter().filter(|b| **b != AIR).count()
    }

    /// Whether the chunk has changes not yet saved.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Flag the chunk as needing a save.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Clear the dirty flag, returning whether it was set.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Encode the blocks for storage.
    pub fn encode(&self) -> Vec<u8> {
        let blocks = self.blocks.read();
        let first = blocks.first().copied().unwrap_or(AIR);
        if blocks.iter().all(|b| *b == first) {
            let mut out = Vec::with_capacity(4);
            out.push(CHUNK_FORMAT_VERSION);
            out.push(TAG_UNIFORM);
            out.extend_from_slice(&first.to_le_bytes());
            return out;
        }
        let mut out = Vec::with_capacity(CHUNK_VOLUME.saturating_mul(2).saturating_add(2));
        out.push(CHUNK_FORMAT_VERSION);
        out.push(TAG_FULL);
        for block in blocks.iter() {
            out.extend_from_slice(&block.to_le_bytes());
        }
        out
    }

    /// Decode stored bytes into a clean chunk at `coord`.
    pub fn decode(coord: ChunkCoord, bytes: &[u8]) -> Result<Self, WorldError> {
        let [version, tag, payload @ ..] = bytes else {
            return Err(corrupt(format!("{} bytes is too short for a header", bytes.len())));
        };
        if *version != CHUNK_FORMAT_VERSION {
            return Err(corrupt(format!("unknown chunk format version {version}")));
        }
        match *tag {
            TAG_UNIFORM => {
                let [lo, hi] = payload else {
                    return Err(corrupt(format!("uniform payload is {} bytes", payload.len())));
                };
                Ok(Self::filled(coord, u16::from_le_bytes([*lo, *hi])))
            }
            TAG_FULL => {
                if payload.len() != CHUNK_VOLUME.saturating_mul(2) {
                    return Err(corrupt(format!("full payload is {} bytes", payload.len())));
                }
                let blocks: Box<[BlockId]> = payload
                    .chunks_exact(2)
                    .map(|pair| match pair {
                        [lo, hi] => u16::from_le_bytes([*lo, *hi]),
                        _ => AIR,
                    })
                    .collect();
                Ok(Self {
                    coord,
                    blocks: RwLock::new(blocks),
                    dirty: AtomicBool::new(false),
                })
            }
            other => Err(corrupt(format!("unknown chunk tag {other}"))),
        }
    }
}

fn corrupt(reason: String) -> WorldError {
    WorldError::CorruptChunk { reason }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn set_block_marks_dirty_only_on_change() {
        let chunk = Chunk::empty(ChunkCoord::new(0, 0, 0));
        let block = BlockCoord::new(3, 4, 5);
        assert_eq!(chunk.set_block(block, AIR), Some(AIR));
        assert!(!chunk.is_dirty());
        assert_eq!(chunk.set_block(block, 7), Some(AIR));
        assert!(chunk.is_dirty());
        assert_eq!(chunk.get_block(block), Some(7));
        assert!(chunk.take_dirty());
        assert!(!chunk.is_dirty());
    }

    #[test]
    fn blocks_outside_chunk_are_ignored() {
        let chunk = Chunk::empty(ChunkCoord::new(1, 0, 0));
        assert_eq!(chunk.get_block(BlockCoord::new(0, 0, 0)), None);
        assert_eq!(chunk.set_block(BlockCoord::new(0, 0, 0), 1), None);
        assert!(!chunk.is_dirty());
    }

    #[test]
    fn uniform_chunk_encodes_compactly() {
        let chunk = Chunk::filled(ChunkCoord::new(0, -1, 0), 2);
        let bytes = chunk.encode();
        assert_eq!(bytes, vec![CHUNK_FORMAT_VERSION, TAG_UNIFORM, 2, 0]);
        let decoded = Chunk::decode(chunk.coord(), &bytes).unwrap();
        assert_eq!(decoded.solid_count(), CHUNK_VOLUME);
    }

    #[test]
    fn mixed_chunk_decodes_to_same_blocks() {
        let coord = ChunkCoord::new(-1, 2, 0);
        let chunk = Chunk::empty(coord);
        let block = BlockCoord::new(-16, 33, 15);
        chunk.set_block(block, 513);
        let decoded = Chunk::decode(coord, &chunk.encode()).unwrap();
        assert_eq!(decoded.get_block(block), Some(513));
        assert_eq!(decoded.solid_count(), 1);
        assert!(!decoded.is_dirty());
    }

    #[test]
    fn corrupt_bytes_are_rejected() {
        let coord = ChunkCoord::new(0, 0, 0);
        assert!(matches!(Chunk::decode(coord, &[]), Err(WorldError::CorruptChunk { .. })));
        assert!(Chunk::decode(coord, &[9, 0, 0, 0]).is_err());
        assert!(Chunk::decode(coord, &[CHUNK_FORMAT_VERSION, TAG_FULL, 1, 2]).is_err());
        assert!(Chunk::decode(coord, &[CHUNK_FORMAT_VERSION, 7]).is_err());
    }
}
