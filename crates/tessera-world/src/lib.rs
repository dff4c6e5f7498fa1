//! Regions, region files, and world persistence for Tessera.
//!
//! A world is split into regions, each a cube of chunks. Regions are created
//! on demand by the [`RegionRegistry`] and backed by one region file each,
//! managed by the [`RegionFileManager`] cache, which closes files that sit
//! idle. Removing a region is only allowed while the world's tick thread is
//! in the copy-snapshot stage.
//!
//! # Modules
//!
//! - [`chunk`] -- Block storage for one chunk and its stored encoding.
//! - [`error`] -- Error types for storage and region operations.
//! - [`file_manager`] -- Per-world region file cache, idle eviction thread,
//!   and chunk input/output streams.
//! - [`generator`] -- Terrain generators and the [`GeneratorRegistry`].
//! - [`region`] -- [`Region`]: loaded chunks of one region cube.
//! - [`region_file`] -- The segment-addressed region file format.
//! - [`registry`] -- [`RegionRegistry`]: concurrent region map with
//!   single-winner installs and stage-gated removal.
//! - [`tick`] -- [`WorldTicker`], which walks a world through one tick.
//! - [`world`] -- The [`World`] aggregate.
//! - [`world_files`] -- Reading and writing `world.dat`.
//!
//! [`GeneratorRegistry`]: generator::GeneratorRegistry
//! [`Region`]: region::Region
//! [`RegionRegistry`]: registry::RegionRegistry
//! [`RegionFileManager`]: file_manager::RegionFileManager
//! [`WorldTicker`]: tick::WorldTicker
//! [`World`]: world::World

pub mod chunk;
pub mod error;
pub mod file_manager;
pub mod generator;
pub mod region;
pub mod region_file;
pub mod registry;
pub mod tick;
pub mod world;
pub mod world_files;

// Re-export primary types at crate root.
pub use chunk::{BlockId, Chunk};
pub use error::WorldError;
pub use file_manager::{ChunkInputStream, ChunkOutputStream, RegionFileHandle, RegionFileManager};
pub use generator::{EmptyWorldGenerator, FlatWorldGenerator, GeneratorRegistry, WorldGenerator};
pub use region::Region;
pub use registry::{RegionRegistry, regions_loaded};
pub use tick::{TickHook, TickSummary, WorldTicker};
pub use world::{World, WorldSettings};
pub use world_files::{load_world, save_world};
