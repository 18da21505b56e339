//! # Geofencing
//!
//! Circular regions marking reproducible start and stop points along a route, so repeated runs
//! over different recordings can be trimmed to the same stretch of road.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::Vector3;
use nav_if::Pose;

use crate::params::Circle;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum GeofenceError {
    #[error(
        "The ground truth never enters the circle of radius {:.2} m around ({:.2}, {:.2}) \
        after frame {from_index}",
        .circle.radius_m,
        .circle.x,
        .circle.y
    )]
    NeverEntered { circle: Circle, from_index: usize },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Circle {
    /// Express a circle given in global coordinates relative to the local offset.
    pub fn to_local(&self, offset: &Vector3<f64>) -> Circle {
        Circle {
            x: self.x - offset.x,
            y: self.y - offset.y,
            radius_m: self.radius_m,
        }
    }

    /// True if the pose lies inside the circle, boundary included.
    pub fn contains(&self, pose: &Pose) -> bool {
        (pose.x - self.x).hypot(pose.y - self.y) <= self.radius_m
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Find the first frame at or after `from_index` whose pose lies inside the circle.
///
/// `poses` must be aligned with frame indices. Distances are planar.
pub fn find_first_frame_entering_circle(
    poses: &[Pose],
    circle: &Circle,
    from_index: usize,
) -> Result<usize, GeofenceError> {
    poses
        .iter()
        .enumerate()
        .skip(from_index)
        .find(|(_, p)| circle.contains(p))
        .map(|(i, _)| i)
        .ok_or(GeofenceError::NeverEntered {
            circle: *circle,
            from_index,
        })
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
