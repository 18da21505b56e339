//! Drift error decomposition

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nav_if::Pose;
use serde::Serialize;
use std::f64::consts::FRAC_PI_2;
use util::maths::get_ang_dist_2pi;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Error of an estimated pose against the actual pose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PoseErrors {
    /// Absolute easting error
    pub x_m: f64,

    /// Absolute northing error
    pub y_m: f64,

    /// Signed altitude error, estimate minus actual
    pub z_m: f64,

    pub error_2d_m: f64,
    pub error_3d_m: f64,

    /// Planar error along the actual heading
    pub along_m: f64,

    /// Planar error across the actual heading
    pub across_m: f64,

    /// Shortest signed angle from the actual heading to the estimated one
    pub heading_rad: f64,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Compute the error of `estimate` against `actual`.
pub fn pose_errors(estimate: &Pose, actual: &Pose) -> PoseErrors {
    let dx = estimate.x - actual.x;
    let dy = estimate.y - actual.y;
    let dz = estimate.altitude - actual.altitude;

    let (along_m, across_m) = along_across(dx, dy, actual.heading);

    PoseErrors {
        x_m: dx.abs(),
        y_m: dy.abs(),
        z_m: dz,
        error_2d_m: dx.hypot(dy),
        error_3d_m: (dx * dx + dy * dy + dz * dz).sqrt(),
        along_m,
        across_m,
        heading_rad: get_ang_dist_2pi(actual.heading, estimate.heading),
    }
}

/// Split a planar error vector into components along and across a compass heading.
///
/// Longitudinal drift shows up in `along`, lateral drift in `across`. The split preserves the
/// planar distance: `along^2 + across^2 == dx^2 + dy^2`.
pub fn along_across(dx: f64, dy: f64, heading: f64) -> (f64, f64) {
    let distance = dx.hypot(dy);
    if distance == 0.0 {
        return (0.0, 0.0);
    }

    let angle = FRAC_PI_2 + heading + dy.atan2(dx);

    (distance * angle.cos(), distance * angle.sin())
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
