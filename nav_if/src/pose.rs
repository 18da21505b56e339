//! # Pose
//!
//! Position and attitude of the vehicle at a single frame, in the local frame of the dataset.
//!
//! Headings follow the compass convention of the navigation log: radians, 0 is north and +pi/2
//! is east. Registration works in a counter-clockwise-from-x convention, see
//! [`Pose::corrected_heading`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Easting in meters
    pub x: f64,

    /// Northing in meters
    pub y: f64,

    /// Altitude in meters
    pub altitude: f64,

    /// Compass heading in radians
    pub heading: f64,

    /// Roll in radians
    pub roll: f64,

    /// Pitch in radians
    pub pitch: f64,

    /// Time stamp of the pose in seconds
    pub age: f64,

    /// Index of the frame this pose belongs to
    #[serde(default)]
    pub frame_index: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Pose {
    pub fn new(x: f64, y: f64, altitude: f64) -> Self {
        Self {
            x,
            y,
            altitude,
            ..Default::default()
        }
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = heading;
        self
    }

    pub fn with_frame_index(mut self, frame_index: usize) -> Self {
        self.frame_index = frame_index;
        self
    }

    pub fn position(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.altitude)
    }

    pub fn point(&self) -> Point3<f64> {
        Point3::new(self.x, self.y, self.altitude)
    }

    /// Move the pose in place.
    pub fn translate(&mut self, dx: f64, dy: f64, dz: f64) {
        self.x += dx;
        self.y += dy;
        self.altitude += dz;
    }

    pub fn translate_by(&mut self, delta: &Vector3<f64>) {
        self.translate(delta.x, delta.y, delta.z)
    }

    pub fn distance2d(&self, other: &Pose) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn distance3d(&self, other: &Pose) -> f64 {
        (self.position() - other.position()).norm()
    }

    /// Convert a local pose into global coordinates by adding the dataset offset.
    pub fn to_global(&self, offset: &Vector3<f64>) -> Pose {
        let mut p = *self;
        p.translate_by(offset);
        p
    }

    /// Convert a global pose into local coordinates by removing the dataset offset.
    pub fn to_local(&self, offset: &Vector3<f64>) -> Pose {
        let mut p = *self;
        p.translate_by(&-offset);
        p
    }

    /// Heading in the registration convention: counter-clockwise from +x, in [0, 2pi).
    pub fn corrected_heading(&self) -> f64 {
        util::maths::wrap_2pi(FRAC_PI_2 - self.heading)
    }

    /// Rotation about z by the corrected heading, taking sensor frame points into the map
    /// orientation.
    pub fn yaw_rotation(&self) -> Rotation3<f64> {
        Rotation3::from_axis_angle(&Vector3::z_axis(), self.corrected_heading())
    }
}

impl std::fmt::Display for Pose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{} ({:.3}, {:.3}, {:.3}) hdg {:.4} rad",
            self.frame_index, self.x, self.y, self.altitude, self.heading
        )
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_translate_and_distance() {
        let mut p = Pose::new(1.0, 2.0, 3.0);
        let q = p;
        p.translate(3.0, 4.0, 12.0);

        assert_eq!(p.position(), Vector3::new(4.0, 6.0, 15.0));
        assert!((p.distance2d(&q) - 5.0).abs() < 1e-12);
        assert!((p.distance3d(&q) - 13.0).abs() < 1e-12);

        // The copy is unaffected by the translation
        assert_eq!(q.position(), Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_global_local() {
        let offset = Vector3::new(500000.0, 6000000.0, 40.0);
        let p = Pose::new(1.5, -2.5, 0.25).with_heading(1.0);

        let g = p.to_global(&offset);
        assert_eq!(g.x, 500001.5);
        assert_eq!(g.heading, 1.0);

        let l = g.to_local(&offset);
        assert!((l.x - p.x).abs() < 1e-9);
        assert!((l.y - p.y).abs() < 1e-9);
        assert!((l.altitude - p.altitude).abs() < 1e-9);
    }

    #[test]
    fn test_corrected_heading() {
        // North maps onto +y
        let north = Pose::default().with_heading(0.0);
        assert!((north.corrected_heading() - FRAC_PI_2).abs() < 1e-12);

        // East maps onto +x
        let east = Pose::default().with_heading(FRAC_PI_2);
        assert!(east.corrected_heading().abs() < 1e-12);

        // West wraps into range
        let west = Pose::default().with_heading(3.0 * FRAC_PI_2);
        assert!((west.corrected_heading() - PI).abs() < 1e-12);

        for i in 0..64 {
            let h = (i as f64) * 0.3 - 6.0;
            let c = Pose::default().with_heading(h).corrected_heading();
            assert!(c >= 0.0 && c < 2.0 * PI);
        }

        // The yaw rotation takes the sensor's forward axis onto the heading direction
        let fwd = east.yaw_rotation() * Vector3::x();
        assert!((fwd - Vector3::x()).norm() < 1e-12);
        let fwd = north.yaw_rotation() * Vector3::x();
        assert!((fwd - Vector3::y()).norm() < 1e-12);
    }
}
