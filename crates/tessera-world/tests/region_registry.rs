//! Integration tests for the region registry under concurrent access.
//!
//! Worlds here are persistent and live in a temporary directory, so region
//! installs also exercise the region file cache.

#![allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use std::thread;

use tessera_core::config::StorageConfig;
use tessera_core::stage::TickStage;
use tessera_types::{BlockCoord, ChunkCoord, LoadOption, RegionCoord};
use tessera_world::{FlatWorldGenerator, World, WorldError, WorldSettings};

/// Number of racing callers in each concurrency test.
const CALLERS: usize = 8;

// =============================================================================
// Helpers
// =============================================================================

struct TempWorld {
    dir: PathBuf,
    world: Arc<World>,
}

impl TempWorld {
    fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("tessera-registry-{}", uuid::Uuid::new_v4()));
        let settings = WorldSettings::new("registry", Arc::new(FlatWorldGenerator::default()), 11);
        let world = World::persistent(settings, &dir, &StorageConfig::default()).expect("world storage");
        Self {
            dir,
            world: Arc::new(world),
        }
    }

    fn enter(&self, stage: TickStage) {
        let clock = self.world.stage_clock();
        while clock.current() != stage {
            clock.advance();
        }
    }
}

impl Drop for TempWorld {
    fn drop(&mut self) {
        if let Some(files) = self.world.files() {
            files.close_all();
        }
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn first_region_creates_file_and_is_shared() {
    let temp = TempWorld::new();
    let origin = RegionCoord::new(0, 0, 0);
    let region_file = temp.dir.join("region").join("reg0_0_0.spr");
    assert!(!region_file.exists());

    let barrier = Arc::new(Barrier::new(CALLERS));
    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let world = Arc::clone(&temp.world);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                world.get_region(origin, LoadOption::LoadGen).expect("region")
            })
        })
        .collect();
    let regions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(regions[0].coord(), origin);
    for region in &regions {
        assert!(Arc::ptr_eq(region, &regions[0]));
    }
    assert_eq!(temp.world.regions().install_count(), 1);
    assert!(region_file.is_file());
    assert!(temp.world.has_region(origin));
    assert!(temp.world.region_file_exists(origin));
}

#[test]
fn concurrent_installs_across_coordinates() {
    let temp = TempWorld::new();
    let barrier = Arc::new(Barrier::new(CALLERS));
    let handles: Vec<_> = (0..CALLERS)
        .map(|i| {
            let world = Arc::clone(&temp.world);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for x in 0..4 {
                    // Half the callers race on the same coordinates, half spread out.
                    let z = i32::try_from(i % 2).unwrap();
                    world.get_region(RegionCoord::new(x, 0, z), LoadOption::LoadOnly).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(temp.world.regions().len(), 8);
    assert_eq!(temp.world.regions().install_count(), 8);
    assert_eq!(temp.world.regions().regions().len(), 8);
}

#[test]
fn removal_is_rejected_outside_copy_snapshot() {
    let temp = TempWorld::new();
    let region = temp.world.get_region(RegionCoord::new(1, 0, 0), LoadOption::LoadGen).unwrap();

    for stage in TickStage::ALL {
        if stage == TickStage::CopySnapshot {
            continue;
        }
        temp.enter(stage);
        let err = temp.world.remove_region(&region).unwrap_err();
        assert!(matches!(err, WorldError::Stage(_)), "{stage} should reject removal");
        assert!(temp.world.has_region(region.coord()));
    }

    temp.enter(TickStage::CopySnapshot);
    assert!(temp.world.remove_region(&region).unwrap());
    assert!(!temp.world.has_region(region.coord()));
    assert!(temp.world.region_file_exists(region.coord()));
}

#[test]
fn stale_reference_never_removes_replacement() {
    let temp = TempWorld::new();
    let coord = RegionCoord::new(0, 2, 0);
    temp.enter(TickStage::CopySnapshot);

    let stale = temp.world.get_region(coord, LoadOption::LoadGen).unwrap();
    assert!(temp.world.remove_region(&stale).unwrap());
    let replacement = temp.world.get_region(coord, LoadOption::LoadGen).unwrap();
    assert!(!Arc::ptr_eq(&stale, &replacement));

    assert!(!temp.world.remove_region(&stale).unwrap());
    let current = temp.world.get_region(coord, LoadOption::NoLoad).unwrap();
    assert!(Arc::ptr_eq(&current, &replacement));
}

#[test]
fn region_from_another_world_is_rejected() {
    let ours = TempWorld::new();
    let theirs = TempWorld::new();
    let foreign = theirs.world.get_region(RegionCoord::new(0, 0, 0), LoadOption::LoadGen).unwrap();

    ours.enter(TickStage::CopySnapshot);
    let err = ours.world.remove_region(&foreign).unwrap_err();
    assert!(matches!(err, WorldError::ForeignRegion { .. }));
    assert!(theirs.world.has_region(foreign.coord()));
}

#[test]
fn saved_chunks_reload_after_region_removal() {
    let temp = TempWorld::new();
    let chunk = ChunkCoord::new(2, -1, 3);
    let region = temp.world.get_region(chunk.region(), LoadOption::LoadGen).unwrap();
    let loaded = region.get_chunk(chunk, LoadOption::LoadGen).unwrap();
    let block = BlockCoord::new(32, -16, 48);
    loaded.set_block(block, 42);
    assert_eq!(region.save_dirty_chunks(), 1);

    temp.enter(TickStage::CopySnapshot);
    assert!(temp.world.remove_region(&region).unwrap());

    let reloaded = temp.world.get_chunk(chunk, LoadOption::LoadOnly).unwrap();
    assert!(!Arc::ptr_eq(&loaded, &reloaded));
    assert_eq!(reloaded.get_block(block), Some(42));
    assert!(!reloaded.is_dirty());
}

#[test]
fn read_failure_does_not_regenerate_stored_chunk() {
    let temp = TempWorld::new();
    let chunk = ChunkCoord::new(0, 0, 0);
    let block = BlockCoord::new(1, 2, 3);
    let region = temp.world.get_region(chunk.region(), LoadOption::LoadGen).unwrap();
    region.get_chunk(chunk, LoadOption::LoadGen).unwrap().set_block(block, 42);
    assert_eq!(region.save_dirty_chunks(), 1);

    temp.enter(TickStage::CopySnapshot);
    assert!(temp.world.remove_region(&region).unwrap());
    let files = temp.world.files().unwrap();
    assert!(files.get_container(chunk.region()).attempt_close());

    // A directory in place of the region file makes every open fail.
    let path = files.region_dir().join(chunk.region().file_name());
    let moved = path.with_extension("moved");
    std::fs::rename(&path, &moved).unwrap();
    std::fs::create_dir(&path).unwrap();

    assert!(temp.world.get_chunk(chunk, LoadOption::LoadGen).is_none());
    let retried = temp.world.get_region(chunk.region(), LoadOption::NoLoad).unwrap();
    assert!(!retried.has_chunk(chunk));
    assert_eq!(temp.world.save_all_chunks(), 0);

    std::fs::remove_dir(&path).unwrap();
    std::fs::rename(&moved, &path).unwrap();

    let reloaded = temp.world.get_chunk(chunk, LoadOption::LoadGen).unwrap();
    assert_eq!(reloaded.get_block(block), Some(42));
    assert!(!reloaded.is_dirty());
}

#[test]
fn corrupt_chunk_is_kept_on_disk() {
    let temp = TempWorld::new();
    let chunk = ChunkCoord::new(0, -1, 0);
    let files = temp.world.files().unwrap();
    let mut out = files.get_chunk_output_stream(chunk);
    out.write_all(&[0xFF, 0xFF]).unwrap();
    out.finish().unwrap();

    assert!(temp.world.get_chunk(chunk, LoadOption::LoadGen).is_none());
    assert_eq!(temp.world.save_all_chunks(), 0);

    let mut bytes = Vec::new();
    files
        .get_chunk_input_stream(chunk)
        .unwrap()
        .expect("slot still written")
        .read_to_end(&mut bytes)
        .unwrap();
    assert_eq!(bytes, [0xFF, 0xFF]);
}
