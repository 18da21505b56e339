//! # Trajectory tracking module
//!
//! Owns the current pose estimate, advances it with each accepted registration, and measures it
//! against the ground truth. The estimated and actual trajectories grow by exactly one vertex per
//! processed frame and are never truncated.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod error;
mod stats;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::info;
use nalgebra::Vector3;
use nav_if::Pose;
use serde::Serialize;

use crate::params::{DivergenceParams, HeadingSource};
use crate::reg::RegistrationResult;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use error::{along_across, pose_errors, PoseErrors};
pub use stats::{MinMeanMax, SummaryStats};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct TrajectoryTracker {
    params: DivergenceParams,
    heading_source: HeadingSource,

    /// Current estimate, advanced every frame
    estimate: Pose,

    estimated_path: Vec<Pose>,
    actual_path: Vec<Pose>,

    /// One record per registered frame
    records: Vec<FrameRecord>,
}

/// Everything measured about one registered frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameRecord {
    pub frame_index: usize,
    pub estimate: Pose,
    pub actual: Pose,

    /// Length of the movement applied to the estimate
    pub movement_m: f64,

    pub fitness: f64,
    pub inlier_rmse: f64,
    pub registration_time_s: f64,
    pub rounds: usize,
    pub converged: bool,

    pub errors: PoseErrors,
}

/// The motion solved for a frame, in the local map frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameMotion {
    /// Translation to apply to the estimate
    pub movement: Vector3<f64>,

    /// Counter-clockwise yaw of the solved transform, radians
    pub yaw: f64,

    pub registration: RegistrationResult,

    pub registration_time_s: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum TrackerError {
    /// The estimate has drifted or jumped too far to be trusted.
    #[error(
        "Frame {frame_index}: {quantity} of {value:.3} m exceeds the ceiling of {ceiling:.3} m \
        (estimate {estimate}, actual {actual})"
    )]
    Divergence {
        frame_index: usize,
        quantity: DivergenceQuantity,
        value: f64,
        ceiling: f64,
        estimate: Pose,
        actual: Pose,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivergenceQuantity {
    Error2d,
    Error3d,
    Movement,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TrajectoryTracker {
    pub fn new(params: DivergenceParams, heading_source: HeadingSource) -> Self {
        Self {
            params,
            heading_source,
            estimate: Pose::default(),
            estimated_path: Vec::new(),
            actual_path: Vec::new(),
            records: Vec::new(),
        }
    }

    /// Set the estimate without a registration and append the frame's vertices.
    ///
    /// Used for the first frame and after re-anchoring. No error record is produced.
    pub fn seed(&mut self, estimate: Pose, actual: &Pose) {
        self.estimate = estimate;
        self.estimate.frame_index = actual.frame_index;
        self.push_vertices(actual);
    }

    /// Re-anchor the estimate onto a new actual pose, keeping the last known drift.
    ///
    /// Used at input file boundaries where consecutive frames aren't spatially continuous.
    pub fn reanchor(&mut self, actual: &Pose) -> Pose {
        let drift = match (self.estimated_path.last(), self.actual_path.last()) {
            (Some(e), Some(a)) => e.position() - a.position(),
            _ => Vector3::zeros(),
        };

        let mut estimate = *actual;
        estimate.translate_by(&drift);
        if self.heading_source == HeadingSource::Derived && !self.estimated_path.is_empty() {
            estimate.heading = self.estimate.heading;
        }

        info!(
            "Re-anchored estimate at frame {} to {} (drift {:.3}, {:.3}, {:.3})",
            actual.frame_index, estimate, drift.x, drift.y, drift.z
        );

        self.estimate = estimate;
        estimate
    }

    /// Advance the estimate by a registered frame's motion and measure it against the ground
    /// truth.
    ///
    /// The vertices and record are kept even if the frame trips a divergence ceiling, so partial
    /// trajectories always include the frame that diverged.
    pub fn update(
        &mut self,
        motion: &FrameMotion,
        actual: &Pose,
    ) -> Result<&FrameRecord, TrackerError> {
        self.estimate.translate_by(&motion.movement);

        self.estimate.heading = match self.heading_source {
            HeadingSource::GroundTruth => actual.heading,
            HeadingSource::Derived => util::maths::wrap_2pi(self.estimate.heading - motion.yaw),
        };
        self.estimate.roll = actual.roll;
        self.estimate.pitch = actual.pitch;
        self.estimate.age = actual.age;
        self.estimate.frame_index = actual.frame_index;

        self.push_vertices(actual);

        let errors = pose_errors(&self.estimate, actual);
        let movement_m = motion.movement.norm();

        self.records.push(FrameRecord {
            frame_index: actual.frame_index,
            estimate: self.estimate,
            actual: *actual,
            movement_m,
            fitness: motion.registration.fitness,
            inlier_rmse: motion.registration.inlier_rmse,
            registration_time_s: motion.registration_time_s,
            rounds: motion.registration.rounds,
            converged: motion.registration.converged,
            errors,
        });

        self.check_divergence(movement_m, &errors, actual)?;

        Ok(&self.records[self.records.len() - 1])
    }

    fn check_divergence(
        &self,
        movement_m: f64,
        errors: &PoseErrors,
        actual: &Pose,
    ) -> Result<(), TrackerError> {
        let checks = [
            (DivergenceQuantity::Movement, movement_m, self.params.max_movement_m),
            (DivergenceQuantity::Error2d, errors.error_2d_m, self.params.max_error_2d_m),
            (DivergenceQuantity::Error3d, errors.error_3d_m, self.params.max_error_3d_m),
        ];

        for (quantity, value, ceiling) in checks.iter() {
            if *ceiling > 0.0 && *value > *ceiling {
                return Err(TrackerError::Divergence {
                    frame_index: actual.frame_index,
                    quantity: *quantity,
                    value: *value,
                    ceiling: *ceiling,
                    estimate: self.estimate,
                    actual: *actual,
                });
            }
        }

        Ok(())
    }

    fn push_vertices(&mut self, actual: &Pose) {
        self.estimated_path.push(self.estimate);
        self.actual_path.push(*actual);
    }

    pub fn estimate(&self) -> &Pose {
        &self.estimate
    }

    pub fn estimated_path(&self) -> &[Pose] {
        &self.estimated_path
    }

    pub fn actual_path(&self) -> &[Pose] {
        &self.actual_path
    }

    pub fn records(&self) -> &[FrameRecord] {
        &self.records
    }

    pub fn summary(&self) -> SummaryStats {
        SummaryStats::from_records(&self.records)
    }
}

impl std::fmt::Display for DivergenceQuantity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DivergenceQuantity::Error2d => write!(f, "2D error"),
            DivergenceQuantity::Error3d => write!(f, "3D error"),
            DivergenceQuantity::Movement => write!(f, "single frame movement"),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use nalgebra::Isometry3;
    use std::f64::consts::FRAC_PI_2;

    fn motion(dx: f64, dy: f64, yaw: f64) -> FrameMotion {
        FrameMotion {
            movement: Vector3::new(dx, dy, 0.0),
            yaw,
            registration: RegistrationResult {
                transform: Isometry3::identity(),
                fitness: 0.9,
                inlier_rmse: 0.05,
                iterations_used: 25,
                rounds: 1,
                converged: true,
                reseeded: false,
            },
            registration_time_s: 0.01,
        }
    }

    fn divergence(max_movement_m: f64) -> DivergenceParams {
        DivergenceParams {
            max_error_2d_m: 200.0,
            max_error_3d_m: 200.0,
            max_movement_m,
        }
    }

    #[test]
    fn test_advance_and_measure() {
        let mut tracker = TrajectoryTracker::new(divergence(100.0), HeadingSource::GroundTruth);
        let start = Pose::new(0.0, 0.0, 0.0).with_frame_index(0);
        tracker.seed(start, &start);

        let actual = Pose::new(1.0, 0.0, 0.0).with_heading(0.3).with_frame_index(1);
        let record = tracker.update(&motion(1.5, 0.0, 0.0), &actual).unwrap();

        assert_eq!(record.frame_index, 1);
        assert!((record.errors.error_2d_m - 0.5).abs() < 1e-12);
        assert!((record.movement_m - 1.5).abs() < 1e-12);

        assert_eq!(tracker.estimate().heading, 0.3);
        assert_eq!(tracker.estimated_path().len(), 2);
        assert_eq!(tracker.actual_path().len(), 2);
        assert_eq!(tracker.records().len(), 1);
    }

    #[test]
    fn test_derived_heading() {
        let mut tracker = TrajectoryTracker::new(divergence(100.0), HeadingSource::Derived);
        let start = Pose::new(0.0, 0.0, 0.0).with_heading(FRAC_PI_2);
        tracker.seed(start, &start);

        // Turning counter-clockwise by 0.1 rad reduces the compass heading
        tracker
            .update(&motion(1.0, 0.0, 0.1), &Pose::new(1.0, 0.0, 0.0).with_heading(9.0))
            .unwrap();

        assert!((tracker.estimate().heading - (FRAC_PI_2 - 0.1)).abs() < 1e-12);
    }

    #[test]
    fn test_movement_ceiling() {
        let start = Pose::default();
        let actual = Pose::new(80.0, 0.0, 0.0).with_frame_index(1);

        let mut tracker = TrajectoryTracker::new(divergence(100.0), HeadingSource::GroundTruth);
        tracker.seed(start, &start);
        assert!(tracker.update(&motion(80.0, 0.0, 0.0), &actual).is_ok());

        let mut tracker = TrajectoryTracker::new(divergence(50.0), HeadingSource::GroundTruth);
        tracker.seed(start, &start);
        match tracker.update(&motion(80.0, 0.0, 0.0), &actual) {
            Err(TrackerError::Divergence {
                quantity, value, ..
            }) => {
                assert_eq!(quantity, DivergenceQuantity::Movement);
                assert_eq!(value, 80.0);
            }
            Ok(_) => panic!("Expected divergence"),
        }

        // Partial trajectory includes the diverging frame
        assert_eq!(tracker.estimated_path().len(), 2);
    }

    #[test]
    fn test_error_ceiling_disabled() {
        let params = DivergenceParams {
            max_error_2d_m: 0.0,
            max_error_3d_m: -1.0,
            max_movement_m: 0.0,
        };
        let mut tracker = TrajectoryTracker::new(params, HeadingSource::GroundTruth);
        tracker.seed(Pose::default(), &Pose::default());

        assert!(tracker
            .update(&motion(1000.0, 0.0, 0.0), &Pose::default())
            .is_ok());
    }

    #[test]
    fn test_reanchor_keeps_drift() {
        let mut tracker = TrajectoryTracker::new(divergence(100.0), HeadingSource::GroundTruth);
        let start = Pose::new(0.0, 0.0, 0.0);
        tracker.seed(start, &start);
        tracker
            .update(&motion(2.0, 1.0, 0.0), &Pose::new(1.5, 0.0, 0.0))
            .unwrap();

        // Last drift is (0.5, 1.0, 0.0)
        let jumped = Pose::new(500.0, 300.0, 10.0).with_frame_index(9);
        let estimate = tracker.reanchor(&jumped);

        assert!((estimate.position() - Vector3::new(500.5, 301.0, 10.0)).norm() < 1e-12);
        assert_eq!(tracker.estimate().position(), estimate.position());

        // Seeding afterwards records the re-anchored vertex
        tracker.seed(estimate, &jumped);
        assert_eq!(tracker.estimated_path().len(), 3);
        assert_eq!(tracker.records().len(), 1);
    }
}
