//! Per-tick stage driver for one world.
//!
//! [`WorldTicker::run_tick`] walks the world's stage clock through one full
//! cycle. Hooks see every stage before the built-in work for that stage:
//!
//! | Stage           | Built-in work                                   |
//! |-----------------|-------------------------------------------------|
//! | `Simulation`    | advance the live age                            |
//! | `PreSnapshot`   | save regions flagged for unload                 |
//! | `CopySnapshot`  | publish snapshots, remove flagged regions       |

use std::sync::Arc;

use tracing::{debug, info};

use tessera_core::snapshot::CopySnapshotManager;
use tessera_core::stage::TickStage;

use crate::error::WorldError;
use crate::world::World;

/// Receives every stage of every tick on the world's tick thread.
pub trait TickHook: Send {
    /// Called after the clock enters `stage`.
    ///
    /// # Errors
    ///
    /// An error aborts the tick.
    fn on_stage(&mut self, world: &World, stage: TickStage) -> Result<(), WorldError>;
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Tick sequence number.
    pub sequence: u64,
    /// Live age after the simulation stage.
    pub age: u64,
    /// Chunks saved from regions being unloaded.
    pub chunks_saved: usize,
    /// Regions removed from the registry.
    pub regions_unloaded: usize,
}

/// Drives one world through its tick stages.
pub struct WorldTicker {
    world: Arc<World>,
    hooks: Vec<Box<dyn TickHook>>,
}

impl WorldTicker {
    /// Ticker for `world` with no hooks.
    pub const fn new(world: Arc<World>) -> Self {
        Self {
            world,
            hooks: Vec::new(),
        }
    }

    /// Add a hook. Hooks run in registration order.
    pub fn add_hook(&mut self, hook: Box<dyn TickHook>) {
        self.hooks.push(hook);
    }

    /// The world being ticked.
    pub const fn world(&self) -> &Arc<World> {
        &self.world
    }

    /// Run one full tick.
    ///
    /// # Errors
    ///
    /// Fails if the clock is not at the end of a tick, or if a hook or a
    /// stage-gated operation fails. The clock is left in the failing stage.
    pub fn run_tick(&mut self) -> Result<TickSummary, WorldError> {
        let clock = Arc::clone(self.world.stage_clock());
        let mut summary = TickSummary::default();

        for stage in TickStage::ALL {
            clock.enter(stage)?;
            for hook in &mut self.hooks {
                hook.on_stage(&self.world, stage)?;
            }
            match stage {
                TickStage::Simulation => {
                    summary.sequence = clock.sequence();
                    summary.age = self.world.age_cell().increment();
                }
                TickStage::PreSnapshot => {
                    summary.chunks_saved = self.save_unloading_regions();
                }
                TickStage::CopySnapshot => {
                    self.world.copy_snapshot_run(summary.sequence)?;
                    summary.regions_unloaded = self.remove_unloading_regions()?;
                }
                TickStage::Physics | TickStage::Lighting | TickStage::Finalize => {}
            }
        }

        debug!(
            world = self.world.name(),
            tick = summary.sequence,
            age = summary.age,
            "Tick complete"
        );
        Ok(summary)
    }

    fn save_unloading_regions(&self) -> usize {
        self.world
            .regions()
            .regions()
            .iter()
            .filter(|region| region.is_unload_requested())
            .map(|region| region.save_dirty_chunks())
            .fold(0_usize, usize::saturating_add)
    }

    fn remove_unloading_regions(&self) -> Result<usize, WorldError> {
        let mut removed = 0_usize;
        for region in self.world.regions().regions() {
            if !region.is_unload_requested() {
                continue;
            }
            // Chunks dirtied after the save stay loaded until the next pass.
            if region.dirty_chunk_count() > 0 && region.storage().is_some() {
                info!(region = %region.coord(), "Region changed after save, deferring unload");
                continue;
            }
            if self.world.remove_region(&region)? {
                removed = removed.saturating_add(1);
            }
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for WorldTicker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldTicker")
            .field("world", &self.world.name())
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::generator::FlatWorldGenerator;
    use crate::world::WorldSettings;
    use tessera_types::{BlockCoord, LoadOption, RegionCoord, Transform};

    fn world() -> Arc<World> {
        Arc::new(World::in_memory(WorldSettings::new(
            "tick",
            Arc::new(FlatWorldGenerator::default()),
            3,
        )))
    }

    #[derive(Default)]
    struct Recorder {
        seen: Arc<parking_lot::Mutex<Vec<TickStage>>>,
    }

    impl TickHook for Recorder {
        fn on_stage(&mut self, _world: &World, stage: TickStage) -> Result<(), WorldError> {
            self.seen.lock().push(stage);
            Ok(())
        }
    }

    struct MoveSpawn;

    impl TickHook for MoveSpawn {
        fn on_stage(&mut self, world: &World, stage: TickStage) -> Result<(), WorldError> {
            if stage == TickStage::Simulation {
                world.set_spawn_point(Transform::at([0.0, 64.0, 0.0]));
            }
            Ok(())
        }
    }

    #[test]
    fn hooks_see_every_stage_in_order() {
        let recorder = Recorder::default();
        let seen = Arc::clone(&recorder.seen);
        let mut ticker = WorldTicker::new(world());
        ticker.add_hook(Box::new(recorder));

        ticker.run_tick().unwrap();
        assert_eq!(*seen.lock(), TickStage::ALL.to_vec());
    }

    #[test]
    fn age_and_spawn_publish_at_end_of_tick() {
        let world = world();
        let mut ticker = WorldTicker::new(Arc::clone(&world));
        ticker.add_hook(Box::new(MoveSpawn));

        let summary = ticker.run_tick().unwrap();
        assert_eq!(summary.sequence, 1);
        assert_eq!(summary.age, 1);
        assert_eq!(world.age(), 1);
        assert_eq!(world.spawn_point(), Transform::at([0.0, 64.0, 0.0]));

        let summary = ticker.run_tick().unwrap();
        assert_eq!(summary.sequence, 2);
        assert_eq!(world.age(), 2);
    }

    #[test]
    fn flagged_region_is_removed_during_copy() {
        let world = world();
        world.set_block(BlockCoord::new(0, -1, 0), 4);
        let coord = RegionCoord::new(0, -1, 0);
        assert!(world.request_region_unload(coord));

        let mut ticker = WorldTicker::new(Arc::clone(&world));
        let summary = ticker.run_tick().unwrap();
        assert_eq!(summary.regions_unloaded, 1);
        assert!(!world.has_region(coord));
        assert!(world.get_region(coord, LoadOption::NoLoad).is_none());
    }

    #[test]
    fn tick_refuses_to_start_mid_cycle() {
        let world = world();
        world.stage_clock().advance();
        let mut ticker = WorldTicker::new(world);
        assert!(matches!(ticker.run_tick(), Err(WorldError::Stage(_))));
    }
}
