//! # Registration module
//!
//! Rigid alignment of a source cloud onto a target cloud. The [`Aligner`] trait is the primitive
//! the rest of the crate is written against, concrete strategies are selected with
//! [`RegistrationStrategy`] and built with [`build_aligner`]. The [`RegistrationController`]
//! drives an aligner through the convergence loop.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod controller;
pub mod icp;
pub mod neighbours;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::Isometry3;
use nav_if::PointCloud;
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use controller::{RegistrationController, RegistrationInput, RegistrationRecord};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A rigid point set registration algorithm.
///
/// Implementations must be deterministic: identical inputs give identical outputs.
pub trait Aligner {
    /// Name of the strategy, as reported in results.
    fn name(&self) -> &'static str;

    /// Find the transform taking `source` onto `target`, starting from `initial`.
    ///
    /// Only pairs closer than `threshold` are used as correspondences, and at most
    /// `max_iterations` iterations are performed. An aligner always returns a transform, its
    /// quality is judged from the fitness and RMSE.
    fn align(
        &self,
        source: &PointCloud,
        target: &PointCloud,
        initial: &Isometry3<f64>,
        threshold: f64,
        max_iterations: usize,
    ) -> Alignment;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Output of a single call to an aligner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alignment {
    pub transform: Isometry3<f64>,

    /// Fraction of source points with a correspondence, in [0, 1]
    pub fitness: f64,

    /// RMS distance of the corresponding pairs
    pub inlier_rmse: f64,

    /// Iterations actually performed, at most the budget given to the aligner
    pub iterations: usize,
}

/// Accepted output of the convergence loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegistrationResult {
    pub transform: Isometry3<f64>,
    pub fitness: f64,
    pub inlier_rmse: f64,

    /// Aligner iterations performed across all rounds
    pub iterations_used: usize,

    pub rounds: usize,

    /// False if the loop ran out of rounds before the transform settled
    pub converged: bool,

    /// True if the accepted transform came from the centroid reseed
    pub reseeded: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The registration strategies available to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistrationStrategy {
    /// Point-to-point ICP from the prior
    PointToPoint,

    /// ICP on voxel downsampled clouds first, then at full resolution
    DownsampleFirst { voxel_size_m: f64 },

    /// ICP seeded from the cloud centroids, ignoring the prior
    CentroidSeeded,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build the aligner for a strategy.
pub fn build_aligner(strategy: RegistrationStrategy) -> Box<dyn Aligner> {
    match strategy {
        RegistrationStrategy::PointToPoint => Box::new(icp::PointToPoint),
        RegistrationStrategy::DownsampleFirst { voxel_size_m } => {
            Box::new(icp::DownsampleFirst { voxel_size_m })
        }
        RegistrationStrategy::CentroidSeeded => Box::new(icp::CentroidSeeded),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
