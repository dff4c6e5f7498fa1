//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure that can stop the engine during
//! startup or while its tick threads run.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: tessera_core::config::ConfigError,
    },

    /// A world operation failed.
    #[error("world error: {source}")]
    World {
        /// The underlying world error.
        #[from]
        source: tessera_world::WorldError,
    },

    /// A configured world could not be loaded or created.
    #[error("world {name:?} could not be loaded")]
    WorldLoad {
        /// Configured world name.
        name: String,
    },

    /// A tick thread could not be started.
    #[error("failed to spawn tick thread for {world:?}: {source}")]
    ThreadSpawn {
        /// World the thread would have driven.
        world: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A tick thread panicked.
    #[error("tick thread for {world:?} panicked")]
    ThreadPanicked {
        /// World the thread was driving.
        world: String,
    },
}
