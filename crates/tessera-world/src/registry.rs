//! Concurrent map of a world's loaded regions.
//!
//! Lookups and installs may come from any thread at any time. Removal is
//! only legal during [`TickStage::CopySnapshot`], so a region never
//! disappears while other threads may be acting on it.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use tessera_core::stage::{StageClock, TickStage};
use tessera_types::{LoadOption, RegionCoord, WorldId};

use crate::error::WorldError;
use crate::file_manager::RegionFileManager;
use crate::generator::WorldGenerator;
use crate::region::Region;

/// Regions loaded across every world in the process.
static REGIONS_LOADED: AtomicI64 = AtomicI64::new(0);

/// Number of regions currently loaded across all worlds.
pub fn regions_loaded() -> i64 {
    REGIONS_LOADED.load(Ordering::Acquire)
}

/// Regions of one world keyed by coordinate.
#[derive(Debug)]
pub struct RegionRegistry {
    world: WorldId,
    regions: DashMap<RegionCoord, Arc<Region>>,
    files: Option<Arc<RegionFileManager>>,
    generator: Arc<dyn WorldGenerator>,
    seed: u64,
    installs: AtomicU64,
}

impl RegionRegistry {
    /// Empty registry for `world`. Regions get storage from `files` when set.
    pub fn new(
        world: WorldId,
        files: Option<Arc<RegionFileManager>>,
        generator: Arc<dyn WorldGenerator>,
        seed: u64,
    ) -> Self {
        Self {
            world,
            regions: DashMap::new(),
            files,
            generator,
            seed,
            installs: AtomicU64::new(0),
        }
    }

    /// World owning this registry.
    pub const fn world(&self) -> WorldId {
        self.world
    }

    /// Look up the region at `coord`, creating it if `option` allows loading.
    ///
    /// When several threads race to create the same region, exactly one
    /// instance is installed and every caller receives it.
    pub fn get_region(&self, coord: RegionCoord, option: LoadOption) -> Option<Arc<Region>> {
        if let Some(existing) = self.regions.get(&coord) {
            return Some(Arc::clone(existing.value()));
        }
        if !option.load_if_needed() {
            return None;
        }

        let storage = self.files.as_ref().map(|files| files.get_container(coord));
        let candidate = Region::new(self.world, coord, storage, Arc::clone(&self.generator), self.seed);

        match self.regions.entry(coord) {
            Entry::Occupied(entry) => {
                debug!(region = %coord, "Lost region install race");
                Some(Arc::clone(entry.get()))
            }
            Entry::Vacant(entry) => {
                let installed = Arc::new(candidate);
                entry.insert(Arc::clone(&installed));
                self.installs.fetch_add(1, Ordering::AcqRel);
                REGIONS_LOADED.fetch_add(1, Ordering::AcqRel);
                Some(installed)
            }
        }
    }

    /// Whether a region is loaded at `coord`.
    pub fn has_region(&self, coord: RegionCoord) -> bool {
        self.regions.contains_key(&coord)
    }

    /// Point-in-time list of loaded regions.
    pub fn regions(&self) -> Vec<Arc<Region>> {
        self.regions.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    /// Number of loaded regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Whether no regions are loaded.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// How many regions this registry has ever installed.
    pub fn install_count(&self) -> u64 {
        self.installs.load(Ordering::Acquire)
    }

    /// Remove `region` if it is still the instance registered at its
    /// coordinate.
    ///
    /// Returns `Ok(false)` if it had already been removed or replaced.
    ///
    /// # Errors
    ///
    /// Fails outside the copy-snapshot stage, or if `region` belongs to a
    /// different world.
    pub fn remove_region(&self, region: &Arc<Region>, clock: &StageClock) -> Result<bool, WorldError> {
        clock.check(TickStage::CopySnapshot)?;

        if region.world() != self.world {
            return Err(WorldError::ForeignRegion {
                region: region.coord(),
                owner: region.world(),
                expected: self.world,
            });
        }

        let removed = self
            .regions
            .remove_if(&region.coord(), |_, current| Arc::ptr_eq(current, region))
            .is_some();
        if !removed {
            info!(region = %region.coord(), "Tried to remove region but it was not registered");
            return Ok(false);
        }

        if REGIONS_LOADED.fetch_sub(1, Ordering::AcqRel) <= 0 {
            info!(loaded = regions_loaded(), "Regions loaded counter dropped below zero");
        }
        Ok(true)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::generator::EmptyWorldGenerator;
    use tessera_core::stage::StageError;

    fn registry() -> RegionRegistry {
        RegionRegistry::new(WorldId::new(), None, Arc::new(EmptyWorldGenerator), 0)
    }

    fn clock_at(stage: TickStage) -> StageClock {
        let clock = StageClock::new();
        while clock.current() != stage {
            clock.advance();
        }
        clock
    }

    #[test]
    fn no_load_does_not_create() {
        let regions = registry();
        assert!(regions.get_region(RegionCoord::new(0, 0, 0), LoadOption::NoLoad).is_none());
        assert!(!regions.has_region(RegionCoord::new(0, 0, 0)));
        assert!(regions.is_empty());
    }

    #[test]
    fn second_lookup_returns_same_region() {
        let regions = registry();
        let coord = RegionCoord::new(1, 2, 3);
        let first = regions.get_region(coord, LoadOption::LoadOnly).unwrap();
        let second = regions.get_region(coord, LoadOption::NoLoad).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(regions.install_count(), 1);
        assert_eq!(regions.regions().len(), 1);
    }

    #[test]
    fn removal_requires_copy_snapshot() {
        let regions = registry();
        let region = regions.get_region(RegionCoord::new(0, 0, 0), LoadOption::LoadGen).unwrap();

        let err = regions.remove_region(&region, &clock_at(TickStage::Simulation)).unwrap_err();
        assert!(matches!(err, WorldError::Stage(StageError::Violation { .. })));
        assert!(regions.has_region(region.coord()));

        assert!(regions.remove_region(&region, &clock_at(TickStage::CopySnapshot)).unwrap());
        assert!(!regions.has_region(region.coord()));
    }

    #[test]
    fn foreign_region_is_rejected() {
        let ours = registry();
        let theirs = registry();
        let region = theirs.get_region(RegionCoord::new(0, 0, 0), LoadOption::LoadGen).unwrap();
        let err = ours.remove_region(&region, &clock_at(TickStage::CopySnapshot)).unwrap_err();
        assert!(matches!(err, WorldError::ForeignRegion { .. }));
    }

    #[test]
    fn stale_instance_does_not_remove_replacement() {
        let regions = registry();
        let coord = RegionCoord::new(4, 4, 4);
        let clock = clock_at(TickStage::CopySnapshot);

        let stale = regions.get_region(coord, LoadOption::LoadGen).unwrap();
        assert!(regions.remove_region(&stale, &clock).unwrap());
        let replacement = regions.get_region(coord, LoadOption::LoadGen).unwrap();

        assert!(!regions.remove_region(&stale, &clock).unwrap());
        let current = regions.get_region(coord, LoadOption::NoLoad).unwrap();
        assert!(Arc::ptr_eq(&current, &replacement));
    }
}
