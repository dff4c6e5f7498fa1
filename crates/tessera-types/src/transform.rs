//! Position, rotation, and scale of a point in a world.

use serde::{Deserialize, Serialize};

/// A spawn transform: position, rotation quaternion `(x, y, z, w)`, and scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// World-space position.
    pub position: [f32; 3],
    /// Rotation quaternion in `(x, y, z, w)` order.
    pub rotation: [f32; 4],
    /// Per-axis scale.
    pub scale: [f32; 3],
}

impl Transform {
    /// Identity rotation and unit scale at `position`.
    pub const fn at(position: [f32; 3]) -> Self {
        Self {
            position,
            rotation: [0.0, 0.0, 0.0, 1.0],
            scale: [1.0, 1.0, 1.0],
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::at([0.0, 0.0, 0.0])
    }
}
