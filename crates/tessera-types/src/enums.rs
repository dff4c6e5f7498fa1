//! Enumerations shared across the workspace.

use serde::{Deserialize, Serialize};

/// How far a lookup may go to materialize state that is not in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadOption {
    /// Only return what is already loaded.
    NoLoad,
    /// Load from storage if needed, but never generate.
    LoadOnly,
    /// Load from storage, generating anything that was never persisted.
    LoadGen,
}

impl LoadOption {
    /// Whether the lookup may construct or load missing state.
    pub const fn load_if_needed(self) -> bool {
        matches!(self, Self::LoadOnly | Self::LoadGen)
    }

    /// Whether the lookup may run the world generator.
    pub const fn generate_if_needed(self) -> bool {
        matches!(self, Self::LoadGen)
    }
}
