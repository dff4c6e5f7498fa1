//! Shared type definitions for the Tessera voxel world.
//!
//! Every crate in the workspace addresses the world through the types
//! defined here, so the coordinate conventions (chunk and region bit widths,
//! slot indexing) live in exactly one place.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for worlds and entities, plus the
//!   [`EntityHandle`] used instead of back-references into a world
//! - [`coords`] -- Block, chunk, and region coordinates with conversions
//! - [`enums`] -- [`LoadOption`] controlling how lookups materialize state
//! - [`transform`] -- Spawn position/rotation/scale persisted with a world

pub mod coords;
pub mod enums;
pub mod ids;
pub mod transform;

pub use coords::{
    BLOCKS_PER_CHUNK_AXIS, BlockCoord, CHUNK_BITS, CHUNKS_PER_REGION_AXIS, ChunkCoord,
    REGION_CHUNK_BITS, REGION_CHUNK_VOLUME, RegionCoord,
};
pub use enums::LoadOption;
pub use ids::{EntityHandle, EntityId, WorldId};
pub use transform::Transform;
