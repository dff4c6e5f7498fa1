//! The world aggregate: identity, snapshotted state, regions, and storage.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use tessera_core::config::StorageConfig;
use tessera_core::snapshot::{CopySnapshotManager, SnapshotManager, SnapshotableU64, SnapshotableValue};
use tessera_core::stage::StageClock;
use tessera_types::{
    BlockCoord, ChunkCoord, EntityHandle, EntityId, LoadOption, RegionCoord, Transform, WorldId,
};

use crate::chunk::{BlockId, Chunk};
use crate::error::WorldError;
use crate::file_manager::RegionFileManager;
use crate::generator::WorldGenerator;
use crate::region::Region;
use crate::registry::RegionRegistry;

/// Free-form per-world data persisted alongside the metadata.
pub type WorldData = BTreeMap<String, serde_json::Value>;

/// Everything needed to construct a [`World`].
#[derive(Debug, Clone)]
pub struct WorldSettings {
    /// Stable world identifier.
    pub id: WorldId,
    /// Display and directory name.
    pub name: String,
    /// Terrain seed.
    pub seed: u64,
    /// Ticks elapsed so far.
    pub age: u64,
    /// Spawn point.
    pub spawn: Transform,
    /// Generator for chunks never saved.
    pub generator: Arc<dyn WorldGenerator>,
}

impl WorldSettings {
    /// Settings for a brand-new world.
    pub fn new(name: impl Into<String>, generator: Arc<dyn WorldGenerator>, seed: u64) -> Self {
        Self {
            id: WorldId::new(),
            name: name.into(),
            seed,
            age: 0,
            spawn: Transform::default(),
            generator,
        }
    }
}

/// A voxel world.
///
/// `age` and the spawn point are double-buffered: tick workers write the
/// live values, everyone else reads the snapshot published at the end of
/// each tick.
#[derive(Debug)]
pub struct World {
    id: WorldId,
    name: String,
    directory: Option<PathBuf>,
    seed: u64,
    generator: Arc<dyn WorldGenerator>,
    stages: Arc<StageClock>,
    snapshots: SnapshotManager,
    age: Arc<SnapshotableU64>,
    spawn: Arc<SnapshotableValue<Transform>>,
    regions: RegionRegistry,
    files: Option<Arc<RegionFileManager>>,
    entities: DashMap<EntityId, Transform>,
    data: Mutex<WorldData>,
}

impl World {
    /// A world that lives only in memory. Chunks are generated, never saved.
    pub fn in_memory(settings: WorldSettings) -> Self {
        Self::build(settings, None, None)
    }

    /// A world persisted under `directory`, with region files in its
    /// region subdirectory.
    ///
    /// # Errors
    ///
    /// Fails if the region directory cannot be created.
    pub fn persistent(settings: WorldSettings, directory: &Path, storage: &StorageConfig) -> Result<Self, WorldError> {
        let files = Arc::new(RegionFileManager::new(directory, storage)?);
        Ok(Self::build(settings, Some(directory.to_path_buf()), Some(files)))
    }

    fn build(settings: WorldSettings, directory: Option<PathBuf>, files: Option<Arc<RegionFileManager>>) -> Self {
        let snapshots = SnapshotManager::new();
        let age = snapshots.track(SnapshotableU64::new(settings.age));
        let spawn = snapshots.track(SnapshotableValue::new(settings.spawn));
        let regions = RegionRegistry::new(
            settings.id,
            files.clone(),
            Arc::clone(&settings.generator),
            settings.seed,
        );
        info!(
            world = %settings.name,
            id = %settings.id,
            generator = settings.generator.id(),
            persistent = files.is_some(),
            "World created"
        );
        Self {
            id: settings.id,
            name: settings.name,
            directory,
            seed: settings.seed,
            generator: settings.generator,
            stages: Arc::new(StageClock::new()),
            snapshots,
            age,
            spawn,
            regions,
            files,
            entities: DashMap::new(),
            data: Mutex::new(WorldData::new()),
        }
    }

    /// World identifier.
    pub const fn id(&self) -> WorldId {
        self.id
    }

    /// World name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding `world.dat` and the region files.
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Terrain seed.
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Chunk generator.
    pub fn generator(&self) -> &Arc<dyn WorldGenerator> {
        &self.generator
    }

    /// Stage clock driven by this world's tick thread.
    pub const fn stage_clock(&self) -> &Arc<StageClock> {
        &self.stages
    }

    /// Manager owning this world's snapshotted values.
    pub const fn snapshots(&self) -> &SnapshotManager {
        &self.snapshots
    }

    /// Age as of the last published snapshot.
    pub fn age(&self) -> u64 {
        self.age.get()
    }

    /// Live age cell, for the tick thread.
    pub fn age_cell(&self) -> &SnapshotableU64 {
        &self.age
    }

    /// Spawn point as of the last published snapshot.
    pub fn spawn_point(&self) -> Transform {
        *self.spawn.get()
    }

    /// Set the live spawn point; visible to readers after the next snapshot.
    pub fn set_spawn_point(&self, spawn: Transform) {
        self.spawn.set(spawn);
    }

    /// Loaded regions.
    pub const fn regions(&self) -> &RegionRegistry {
        &self.regions
    }

    /// Region file cache, for persistent worlds.
    pub fn files(&self) -> Option<&Arc<RegionFileManager>> {
        self.files.as_ref()
    }

    /// Look up or create the region at `coord`.
    pub fn get_region(&self, coord: RegionCoord, option: LoadOption) -> Option<Arc<Region>> {
        self.regions.get_region(coord, option)
    }

    /// Whether the region at `coord` is loaded.
    pub fn has_region(&self, coord: RegionCoord) -> bool {
        self.regions.has_region(coord)
    }

    /// Remove `region`. Only legal during the copy-snapshot stage.
    pub fn remove_region(&self, region: &Arc<Region>) -> Result<bool, WorldError> {
        self.regions.remove_region(region, &self.stages)
    }

    /// Whether a region file exists on disk for `coord`.
    pub fn region_file_exists(&self, coord: RegionCoord) -> bool {
        self.files.as_ref().is_some_and(|files| files.region_file_exists(coord))
    }

    /// Look up `chunk`, creating its region and loading or generating the
    /// chunk as `option` allows.
    pub fn get_chunk(&self, chunk: ChunkCoord, option: LoadOption) -> Option<Arc<Chunk>> {
        self.get_region(chunk.region(), option)?.get_chunk(chunk, option)
    }

    /// Block at `block`, loading its chunk as `option` allows.
    pub fn get_block(&self, block: BlockCoord, option: LoadOption) -> Option<BlockId> {
        self.get_chunk(block.chunk(), option)?.get_block(block)
    }

    /// Set the block at `block`, generating its chunk if needed. Returns the
    /// previous block.
    pub fn set_block(&self, block: BlockCoord, id: BlockId) -> Option<BlockId> {
        self.get_chunk(block.chunk(), LoadOption::LoadGen)?.set_block(block, id)
    }

    /// Flag the region at `coord` for save and removal at the next snapshot.
    /// Returns `false` if it is not loaded.
    pub fn request_region_unload(&self, coord: RegionCoord) -> bool {
        let Some(region) = self.regions.get_region(coord, LoadOption::NoLoad) else {
            return false;
        };
        region.request_unload();
        true
    }

    /// Save every dirty chunk of every loaded region. Returns chunks saved.
    pub fn save_all_chunks(&self) -> usize {
        self.regions
            .regions()
            .iter()
            .map(|region| region.save_dirty_chunks())
            .fold(0_usize, usize::saturating_add)
    }

    /// Place a new entity at `transform` and return its handle.
    pub fn spawn_entity(&self, transform: Transform) -> EntityHandle {
        let entity = EntityId::new();
        self.entities.insert(entity, transform);
        EntityHandle::new(self.id, entity)
    }

    /// Current transform of the entity behind `handle`, or `None` if it
    /// lives in another world or has been despawned.
    pub fn entity_transform(&self, handle: &EntityHandle) -> Option<Transform> {
        if !handle.belongs_to(self.id) {
            return None;
        }
        self.entities.get(&handle.entity).map(|entry| *entry.value())
    }

    /// Move the entity behind `handle`. Returns `false` if it does not
    /// resolve in this world.
    pub fn move_entity(&self, handle: &EntityHandle, transform: Transform) -> bool {
        if !handle.belongs_to(self.id) {
            return false;
        }
        let Some(mut entry) = self.entities.get_mut(&handle.entity) else {
            return false;
        };
        *entry = transform;
        true
    }

    /// Remove the entity behind `handle`. Returns whether it existed here.
    pub fn despawn_entity(&self, handle: &EntityHandle) -> bool {
        handle.belongs_to(self.id) && self.entities.remove(&handle.entity).is_some()
    }

    /// Number of live entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Store `value` under `key` in the world data.
    pub fn set_data(&self, key: impl Into<String>, value: serde_json::Value) -> Option<serde_json::Value> {
        self.data.lock().insert(key.into(), value)
    }

    /// Value stored under `key` in the world data.
    pub fn data(&self, key: &str) -> Option<serde_json::Value> {
        self.data.lock().get(key).cloned()
    }

    /// Serialize the world data for storage.
    pub fn encode_data(&self) -> Result<Vec<u8>, WorldError> {
        Ok(serde_json::to_vec(&*self.data.lock())?)
    }

    /// Replace the world data with the decoded contents of `bytes`. Empty
    /// input clears it.
    pub fn decode_data(&self, bytes: &[u8]) -> Result<(), WorldError> {
        let decoded = if bytes.is_empty() {
            WorldData::new()
        } else {
            serde_json::from_slice(bytes)?
        };
        *self.data.lock() = decoded;
        Ok(())
    }

    /// Save all chunks and close every region file.
    pub fn shutdown(&self) {
        let saved = self.save_all_chunks();
        let refused = self.files.as_ref().map_or(0, |files| files.close_all());
        info!(world = %self.name, saved, refused, "World shut down");
    }
}

impl CopySnapshotManager for World {
    type Error = WorldError;

    fn copy_snapshot_run(&self, sequence: u64) -> Result<(), WorldError> {
        let copied = self.snapshots.copy_all(&self.stages)?;
        debug!(world = %self.name, sequence, copied, "Copied world snapshots");
        Ok(())
    }
}
