//! Terrain generators and the registry that resolves them by identifier.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tessera_types::ChunkCoord;

use crate::chunk::{BlockId, Chunk};
use crate::error::WorldError;

/// Produces the initial contents of chunks that have never been saved.
pub trait WorldGenerator: Send + Sync + fmt::Debug {
    /// Identifier persisted in world metadata.
    fn id(&self) -> &str;

    /// Build the chunk at `coord` for a world with `seed`.
    fn generate(&self, coord: ChunkCoord, seed: u64) -> Chunk;
}

/// Solid ground below y = 0, air above.
#[derive(Debug, Clone, Copy)]
pub struct FlatWorldGenerator {
    material: BlockId,
}

impl FlatWorldGenerator {
    /// Block used for the ground layer.
    pub const DEFAULT_MATERIAL: BlockId = 1;

    /// Flat generator filling the ground with `material`.
    pub const fn new(material: BlockId) -> Self {
        Self { material }
    }
}

impl Default for FlatWorldGenerator {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MATERIAL)
    }
}

impl WorldGenerator for FlatWorldGenerator {
    fn id(&self) -> &str {
        "flat"
    }

    fn generate(&self, coord: ChunkCoord, _seed: u64) -> Chunk {
        // Chunks never straddle y = 0, so each is wholly ground or wholly air.
        if coord.base_block_y() < 0 {
            Chunk::filled(coord, self.material)
        } else {
            Chunk::empty(coord)
        }
    }
}

/// Generates nothing but air.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyWorldGenerator;

impl WorldGenerator for EmptyWorldGenerator {
    fn id(&self) -> &str {
        "empty"
    }

    fn generate(&self, coord: ChunkCoord, _seed: u64) -> Chunk {
        Chunk::empty(coord)
    }
}

/// Generators keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct GeneratorRegistry {
    generators: BTreeMap<String, Arc<dyn WorldGenerator>>,
}

impl GeneratorRegistry {
    /// Registry with the built-in `flat` and `empty` generators.
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(FlatWorldGenerator::default()));
        registry.register(Arc::new(EmptyWorldGenerator));
        registry
    }

    /// Add `generator`, replacing any registered under the same identifier.
    pub fn register(&mut self, generator: Arc<dyn WorldGenerator>) {
        self.generators.insert(generator.id().to_owned(), generator);
    }

    /// Generator registered as `id`.
    pub fn get(&self, id: &str) -> Option<Arc<dyn WorldGenerator>> {
        self.generators.get(id).cloned()
    }

    /// Generator registered as `id`, or an error naming it.
    pub fn resolve(&self, id: &str) -> Result<Arc<dyn WorldGenerator>, WorldError> {
        self.get(id)
            .ok_or_else(|| WorldError::UnknownGenerator(id.to_owned()))
    }

    /// Registered identifiers in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.generators.keys().map(String::as_str)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::chunk::CHUNK_VOLUME;

    #[test]
    fn flat_world_is_solid_below_zero() {
        let generator = FlatWorldGenerator::default();
        assert_eq!(generator.generate(ChunkCoord::new(0, -1, 0), 0).solid_count(), CHUNK_VOLUME);
        assert_eq!(generator.generate(ChunkCoord::new(0, 0, 0), 0).solid_count(), 0);
    }

    #[test]
    fn registry_resolves_builtins() {
        let registry = GeneratorRegistry::with_defaults();
        assert_eq!(registry.resolve("flat").unwrap().id(), "flat");
        assert_eq!(registry.resolve("empty").unwrap().id(), "empty");
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["empty", "flat"]);
        assert!(matches!(registry.resolve("caves"), Err(WorldError::UnknownGenerator(id)) if id == "caves"));
    }
}
