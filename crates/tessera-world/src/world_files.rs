//! Loading and saving world metadata (`world.dat`).
//!
//! Failures here never stop the engine: they are logged and reported as
//! `None` from [`load_world`] or `false` from [`save_world`].

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use tessera_core::config::StorageConfig;
use tessera_types::{Transform, WorldId};

use crate::error::WorldError;
use crate::generator::{GeneratorRegistry, WorldGenerator};
use crate::world::{World, WorldSettings};

/// Metadata format version written by this build.
pub const WORLD_VERSION: u8 = 1;

/// File name of the metadata document inside a world directory.
pub const WORLD_FILE: &str = "world.dat";

/// Persisted world metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldMetadata {
    /// Format version.
    pub version: u8,
    /// Identifier of the generator the world was created with.
    pub generator: String,
    /// Terrain seed.
    pub seed: u64,
    /// JSON-encoded world data map.
    #[serde(default)]
    pub extra_data: Vec<u8>,
    /// Ticks elapsed.
    pub age: u64,
    /// World UUID.
    pub uuid: Uuid,
    /// Spawn point.
    pub spawn_position: Transform,
    /// When this document was written.
    pub saved_at: DateTime<Utc>,
}

/// Check that `found` is the version this build reads.
pub const fn check_version(found: u8) -> Result<(), WorldError> {
    if found > WORLD_VERSION {
        Err(WorldError::UnsupportedVersion {
            found,
            supported: WORLD_VERSION,
        })
    } else if found < WORLD_VERSION {
        Err(WorldError::OutdatedVersion {
            found,
            supported: WORLD_VERSION,
        })
    } else {
        Ok(())
    }
}

/// Pick the generator for a world saved with `persisted`.
///
/// A registered persisted generator wins over `requested`; a mismatch is
/// logged either way.
pub fn resolve_generator(
    registry: &GeneratorRegistry,
    persisted: &str,
    requested: Arc<dyn WorldGenerator>,
) -> Arc<dyn WorldGenerator> {
    if persisted == requested.id() {
        return requested;
    }
    if let Some(generator) = registry.get(persisted) {
        warn!(
            persisted,
            requested = requested.id(),
            "World was created with a different generator, keeping the saved one"
        );
        generator
    } else {
        warn!(
            persisted,
            requested = requested.id(),
            "Saved generator is not registered, using the requested one"
        );
        requested
    }
}

/// Path of the metadata document for `world_dir`.
pub fn world_file(world_dir: &Path) -> PathBuf {
    world_dir.join(WORLD_FILE)
}

/// Load the world `name` from `worlds_dir`, creating it if it has no
/// metadata yet.
///
/// Returns `None` if the metadata is unreadable or from another format
/// version, or if the world's storage cannot be set up.
pub fn load_world(
    worlds_dir: &Path,
    name: &str,
    requested: Arc<dyn WorldGenerator>,
    registry: &GeneratorRegistry,
    storage: &StorageConfig,
    seed: u64,
) -> Option<World> {
    let world_dir = worlds_dir.join(name);
    if let Err(e) = std::fs::create_dir_all(&world_dir) {
        error!(world = name, dir = %world_dir.display(), error = %e, "Unable to create world directory");
        return None;
    }

    let path = world_file(&world_dir);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            info!(world = name, generator = requested.id(), seed, "Creating new world");
            return create_world(&world_dir, WorldSettings::new(name, requested, seed), storage);
        }
        Err(e) => {
            error!(world = name, path = %path.display(), error = %e, "Unable to read world file");
            return None;
        }
    };

    let metadata: WorldMetadata = match serde_json::from_slice(&bytes) {
        Ok(metadata) => metadata,
        Err(e) => {
            error!(world = name, path = %path.display(), error = %e, "Unable to parse world file");
            return None;
        }
    };
    if let Err(e) = check_version(metadata.version) {
        error!(world = name, error = %e, "Unable to load world");
        return None;
    }

    let settings = WorldSettings {
        id: WorldId::from(metadata.uuid),
        name: name.to_owned(),
        seed: metadata.seed,
        age: metadata.age,
        spawn: metadata.spawn_position,
        generator: resolve_generator(registry, &metadata.generator, requested),
    };
    let world = match World::persistent(settings, &world_dir, storage) {
        Ok(world) => world,
        Err(e) => {
            error!(world = name, error = %e, "Unable to set up world storage");
            return None;
        }
    };
    if let Err(e) = world.decode_data(&metadata.extra_data) {
        error!(world = name, error = %e, "Discarding unreadable world data");
    }
    info!(world = name, id = %world.id(), age = metadata.age, "Loaded world");
    Some(world)
}

fn create_world(world_dir: &Path, settings: WorldSettings, storage: &StorageConfig) -> Option<World> {
    let name = settings.name.clone();
    match World::persistent(settings, world_dir, storage) {
        Ok(world) => {
            if !save_world(&world) {
                warn!(world = %name, "New world could not be saved yet");
            }
            Some(world)
        }
        Err(e) => {
            error!(world = %name, error = %e, "Unable to set up world storage");
            None
        }
    }
}

/// Write the metadata document for `world`. Returns `false` on failure.
///
/// The document is written to a temporary file and renamed into place, so a
/// crash mid-write leaves the previous version intact.
pub fn save_world(world: &World) -> bool {
    let Some(world_dir) = world.directory() else {
        warn!(world = world.name(), "Cannot save a world without a directory");
        return false;
    };
    match write_metadata(world, world_dir) {
        Ok(()) => true,
        Err(e) => {
            error!(world = world.name(), error = %e, "Unable to save world");
            false
        }
    }
}

fn write_metadata(world: &World, world_dir: &Path) -> Result<(), WorldError> {
    std::fs::create_dir_all(world_dir)
        .map_err(|source| WorldError::io(format!("create {}", world_dir.display()), source))?;

    let metadata = WorldMetadata {
        version: WORLD_VERSION,
        generator: world.generator().id().to_owned(),
        seed: world.seed(),
        extra_data: world.encode_data()?,
        age: world.age(),
        uuid: world.id().into_inner(),
        spawn_position: world.spawn_point(),
        saved_at: Utc::now(),
    };
    let bytes = serde_json::to_vec_pretty(&metadata)?;

    let path = world_file(world_dir);
    let staging = path.with_extension("dat.tmp");
    std::fs::write(&staging, bytes)
        .map_err(|source| WorldError::io(format!("write {}", staging.display()), source))?;
    std::fs::rename(&staging, &path)
        .map_err(|source| WorldError::io(format!("replace {}", path.display()), source))
}
