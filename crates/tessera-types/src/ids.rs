//! Type-safe identifier wrappers around [`Uuid`].
//!
//! Worlds and entities get distinct id types so they cannot be mixed up at
//! compile time. Entities never hold a pointer to their world; they hold an
//! [`EntityHandle`] that is resolved through the owning world's registry.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around [`Uuid`] with standard derives.
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new identifier using UUID v7 (time-ordered).
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Return the inner [`Uuid`] value.
            pub const fn into_inner(self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id! {
    /// Unique identifier for a world. Persisted as the world's UUID.
    WorldId
}

define_id! {
    /// Unique identifier for an entity within a world.
    EntityId
}

/// Lightweight, copyable reference to an entity.
///
/// Resolved on demand through the world registry; holding a handle never
/// keeps a world, region, or chunk alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityHandle {
    /// The world the entity lives in.
    pub world: WorldId,
    /// The entity within that world.
    pub entity: EntityId,
}

impl EntityHandle {
    /// Build a handle from its two halves.
    pub const fn new(world: WorldId, entity: EntityId) -> Self {
        Self { world, entity }
    }

    /// Whether the handle points into `world`.
    pub fn belongs_to(&self, world: WorldId) -> bool {
        self.world == world
    }
}
