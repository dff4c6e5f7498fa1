//! Tessera world engine binary.
//!
//! Loads every configured world, drives each one on its own tick thread,
//! and shuts down cleanly once the tick limit is reached.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `tessera-config.yaml` (or the path given as
//!    the first argument)
//! 2. Initialize structured logging (tracing)
//! 3. Load or create each configured world
//! 4. Spawn one tick thread per world
//! 5. Wait for every tick thread to finish
//! 6. Save world metadata and dirty chunks, close all region files

mod error;
mod world_loop;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use tessera_core::config::{LoggingConfig, TesseraConfig};
use tessera_core::control::RunControl;
use tessera_world::{GeneratorRegistry, World, WorldError, WorldTicker, load_world, save_world};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::world_loop::WorldRunResult;

/// Config file used when no path is given on the command line.
const DEFAULT_CONFIG_PATH: &str = "tessera-config.yaml";

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if configuration is invalid, a world cannot be loaded,
/// or a tick thread fails.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration. Logging depends on it, so it comes first.
    let config_path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let (config, from_file) = load_config(&config_path)?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(config = %config_path.display(), from_file, "tessera-engine starting");
    info!(
        worlds_dir = %config.engine.worlds_dir.display(),
        worlds = config.engine.worlds.len(),
        tick_interval_ms = config.engine.tick_interval_ms,
        max_ticks = config.engine.max_ticks,
        region_timeout_ms = config.storage.region_timeout_ms,
        "Configuration loaded"
    );

    // 3. Load worlds.
    let generators = GeneratorRegistry::with_defaults();
    let worlds = load_worlds(&config, &generators)?;

    // 4. Spawn tick threads.
    let control = Arc::new(RunControl::new(
        config.engine.tick_interval_ms,
        config.engine.max_ticks,
    ));
    let threads = spawn_tick_threads(&worlds, &control)?;

    // 5. Wait for every world.
    let mut failure: Option<EngineError> = None;
    for (name, thread) in threads {
        match thread.join() {
            Ok(Ok(result)) => world_loop::log_world_end(&result),
            Ok(Err(e)) => {
                error!(world = name, error = %e, "World tick loop failed");
                if failure.is_none() {
                    failure = Some(EngineError::from(e));
                }
            }
            Err(_) => {
                error!(world = name, "World tick thread panicked");
                if failure.is_none() {
                    failure = Some(EngineError::ThreadPanicked { world: name });
                }
            }
        }
    }

    // 6. Persist and close.
    for world in &worlds {
        if !save_world(world) {
            warn!(world = world.name(), "World metadata was not saved");
        }
        world.shutdown();
    }

    if let Some(e) = failure {
        return Err(e.into());
    }
    info!("tessera-engine shutdown complete");
    Ok(())
}

/// Load configuration from `path`, falling back to defaults if it does not
/// exist. The flag reports whether the file was read.
fn load_config(path: &Path) -> Result<(TesseraConfig, bool), EngineError> {
    if path.exists() {
        Ok((TesseraConfig::from_file(path)?, true))
    } else {
        Ok((TesseraConfig::parse("")?, false))
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Load or create every configured world.
fn load_worlds(config: &TesseraConfig, generators: &GeneratorRegistry) -> Result<Vec<Arc<World>>, EngineError> {
    let mut worlds = Vec::with_capacity(config.engine.worlds.len());
    for entry in &config.engine.worlds {
        let generator = generators.resolve(&entry.generator)?;
        let seed = entry.seed.unwrap_or_else(rand::random);
        let world = load_world(
            &config.engine.worlds_dir,
            &entry.name,
            generator,
            generators,
            &config.storage,
            seed,
        )
        .ok_or_else(|| EngineError::WorldLoad {
            name: entry.name.clone(),
        })?;
        info!(
            world = world.name(),
            id = %world.id(),
            generator = world.generator().id(),
            seed = world.seed(),
            age = world.age(),
            "World ready"
        );
        worlds.push(Arc::new(world));
    }
    Ok(worlds)
}

type TickThread = JoinHandle<Result<WorldRunResult, WorldError>>;

/// Start one named tick thread per world. A thread whose loop fails asks
/// the others to stop.
fn spawn_tick_threads(
    worlds: &[Arc<World>],
    control: &Arc<RunControl>,
) -> Result<Vec<(String, TickThread)>, EngineError> {
    let mut threads = Vec::with_capacity(worlds.len());
    for world in worlds {
        let name = world.name().to_owned();
        let mut ticker = WorldTicker::new(Arc::clone(world));
        let thread_control = Arc::clone(control);
        let spawned = std::thread::Builder::new()
            .name(format!("tick-{name}"))
            .spawn(move || {
                let result = world_loop::run_world(&mut ticker, &thread_control);
                if result.is_err() {
                    thread_control.request_stop();
                }
                result
            });
        match spawned {
            Ok(thread) => threads.push((name, thread)),
            Err(source) => {
                control.request_stop();
                for (_, started) in threads {
                    let _ = started.join();
                }
                return Err(EngineError::ThreadSpawn { world: name, source });
            }
        }
    }
    Ok(threads)
}
