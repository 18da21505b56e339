//! # Navigation results
//!
//! Everything needed to reproduce and audit a run: both trajectories, per-frame and
//! per-registration diagnostics, summary statistics, stage timings and the parameters used.
//! Results are produced for failed runs too, tagged with a `failed` status.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{Isometry3, Vector3};
use nav_if::{PointCloud, Pose};
use serde::Serialize;
use std::collections::BTreeMap;

use super::{FatalError, NavState};
use crate::params::NavExecParams;
use crate::reg::RegistrationRecord;
use crate::traj::{FrameRecord, SummaryStats};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct NavResults {
    pub status: RunStatus,

    /// State the session ended in
    pub final_state: NavState,

    /// Description of the fatal error that ended the run, if any
    pub error: Option<String>,

    /// Name of the registration strategy
    pub aligner: &'static str,

    /// Local origin offset, add this to any local coordinate to get back to global
    pub offset: Vector3<f64>,

    pub start_frame: usize,
    pub stop_frame: Option<usize>,
    pub frames_processed: usize,

    /// Number of points in the running model
    pub model_points: usize,

    pub estimated_trajectory: Vec<Pose>,
    pub actual_trajectory: Vec<Pose>,

    pub frames: Vec<FrameRecord>,
    pub registrations: Vec<RegistrationRecord>,

    pub summary: SummaryStats,

    /// Total seconds spent in each pipeline stage
    pub timings_s: BTreeMap<String, f64>,

    pub params: NavExecParams,
}

/// Final output of a session: the results, the finalised model, and the error that ended the run
/// if it failed.
#[derive(Debug)]
pub struct NavOutput {
    pub results: NavResults,
    pub model: PointCloud,
    pub error: Option<FatalError>,
}

/// Flat per-frame row for the CSV archive.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveRow {
    pub frame_index: usize,
    pub est_x_m: f64,
    pub est_y_m: f64,
    pub est_z_m: f64,
    pub est_heading_rad: f64,
    pub act_x_m: f64,
    pub act_y_m: f64,
    pub act_z_m: f64,
    pub act_heading_rad: f64,
    pub movement_m: f64,
    pub fitness: f64,
    pub inlier_rmse: f64,
    pub registration_time_s: f64,
    pub rounds: usize,
    pub converged: bool,
    pub error_x_m: f64,
    pub error_y_m: f64,
    pub error_z_m: f64,
    pub error_2d_m: f64,
    pub error_3d_m: f64,
    pub along_m: f64,
    pub across_m: f64,
    pub heading_error_rad: f64,
}

/// Source and target of a poorly registered frame, saved for offline inspection.
#[derive(Debug, Clone, Serialize)]
pub struct FramePair {
    pub frame_index: usize,
    pub source_name: Option<String>,
    pub fitness: f64,
    pub inlier_rmse: f64,
    pub transform: Isometry3<f64>,
    pub source: PointCloud,
    pub target: PointCloud,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Checkpoint of a run still in progress
    Running,
    Finished,
    Failed,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl From<&FrameRecord> for ArchiveRow {
    fn from(r: &FrameRecord) -> Self {
        Self {
            frame_index: r.frame_index,
            est_x_m: r.estimate.x,
            est_y_m: r.estimate.y,
            est_z_m: r.estimate.altitude,
            est_heading_rad: r.estimate.heading,
            act_x_m: r.actual.x,
            act_y_m: r.actual.y,
            act_z_m: r.actual.altitude,
            act_heading_rad: r.actual.heading,
            movement_m: r.movement_m,
            fitness: r.fitness,
            inlier_rmse: r.inlier_rmse,
            registration_time_s: r.registration_time_s,
            rounds: r.rounds,
            converged: r.converged,
            error_x_m: r.errors.x_m,
            error_y_m: r.errors.y_m,
            error_z_m: r.errors.z_m,
            error_2d_m: r.errors.error_2d_m,
            error_3d_m: r.errors.error_3d_m,
            along_m: r.errors.along_m,
            across_m: r.errors.across_m,
            heading_error_rad: r.errors.heading_rad,
        }
    }
}

impl NavResults {
    /// Estimated trajectory in global coordinates.
    pub fn estimated_trajectory_global(&self) -> Vec<Pose> {
        self.estimated_trajectory
            .iter()
            .map(|p| p.to_global(&self.offset))
            .collect()
    }
}
