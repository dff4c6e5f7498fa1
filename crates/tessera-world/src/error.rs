//! Error types for the `tessera-world` crate.
//!
//! Only setup failures and programming errors surface as [`WorldError`].
//! Storage hiccups during normal operation are logged and reported through
//! `Option`/`bool` results so the simulation keeps running.

use std::path::PathBuf;

use tessera_core::stage::StageError;
use tessera_types::{RegionCoord, WorldId};

/// Errors that can occur in region, storage, and world operations.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    /// The region directory could not be created.
    #[error("cannot create storage directory {path}: {source}")]
    StorageSetup {
        /// Directory that could not be created.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A file operation failed.
    #[error("{context}: {source}")]
    Io {
        /// What was being attempted.
        context: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// A phase-gated operation ran in the wrong tick stage.
    #[error(transparent)]
    Stage(#[from] StageError),

    /// A region was handed to a registry belonging to another world.
    #[error("region {region} belongs to world {owner}, not {expected}")]
    ForeignRegion {
        /// The region's coordinate.
        region: RegionCoord,
        /// World the region belongs to.
        owner: WorldId,
        /// World of the registry it was handed to.
        expected: WorldId,
    },

    /// The world metadata document could not be encoded or decoded.
    #[error("world metadata error: {0}")]
    Metadata(#[from] serde_json::Error),

    /// The world metadata was written by a newer format.
    #[error("world version {found} exceeds maximum supported version {supported}")]
    UnsupportedVersion {
        /// Version found on disk.
        found: u8,
        /// Highest version this build reads.
        supported: u8,
    },

    /// The world metadata was written by an older, unmigrated format.
    #[error("outdated world version {found} (current is {supported})")]
    OutdatedVersion {
        /// Version found on disk.
        found: u8,
        /// Version this build reads.
        supported: u8,
    },

    /// No generator is registered under the requested identifier.
    #[error("no world generator registered as {0:?}")]
    UnknownGenerator(String),

    /// A background thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        /// Thread name.
        name: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Stored chunk bytes could not be decoded.
    #[error("corrupt chunk data: {reason}")]
    CorruptChunk {
        /// What was wrong with the data.
        reason: String,
    },
}

impl WorldError {
    /// Wrap an I/O error with a description of the failed operation.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
