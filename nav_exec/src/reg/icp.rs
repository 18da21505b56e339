//! # Iterative closest point aligners
//!
//! Point-to-point ICP and the strategies built on top of it. Each iteration pairs every
//! transformed source point with its nearest target point inside the correspondence threshold,
//! solves the best rigid transform between the pairs with the SVD (Kabsch) method, and composes
//! it onto the running estimate.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::trace;
use nalgebra::{Isometry3, Matrix3, Point3, Rotation3, Translation3, UnitQuaternion, Vector3};
use nav_if::PointCloud;

use super::{neighbours::NeighbourGrid, Aligner, Alignment};
use crate::map::voxel_downsample;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Iteration stops early once an update moves the estimate less than this
const UPDATE_EPSILON: f64 = 1e-10;

/// Ratio of singular values below which the correspondences are treated as degenerate
const RANK_EPSILON: f64 = 1e-9;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Plain point-to-point ICP seeded with the caller's prior.
#[derive(Debug, Default, Clone, Copy)]
pub struct PointToPoint;

/// Coarse ICP on voxel downsampled copies, refined at full resolution.
#[derive(Debug, Clone, Copy)]
pub struct DownsampleFirst {
    pub voxel_size_m: f64,
}

/// ICP seeded by aligning the cloud centroids, ignoring the prior.
#[derive(Debug, Default, Clone, Copy)]
pub struct CentroidSeeded;

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Aligner for PointToPoint {
    fn name(&self) -> &'static str {
        "point_to_point"
    }

    fn align(
        &self,
        source: &PointCloud,
        target: &PointCloud,
        initial: &Isometry3<f64>,
        threshold: f64,
        max_iterations: usize,
    ) -> Alignment {
        icp(&source.points, &target.points, initial, threshold, max_iterations)
    }
}

impl Aligner for DownsampleFirst {
    fn name(&self) -> &'static str {
        "downsample_first"
    }

    fn align(
        &self,
        source: &PointCloud,
        target: &PointCloud,
        initial: &Isometry3<f64>,
        threshold: f64,
        max_iterations: usize,
    ) -> Alignment {
        let coarse_source = voxel_downsample(source, self.voxel_size_m);
        let coarse_target = voxel_downsample(target, self.voxel_size_m);

        // Coarse clouds are sparser so correspondences are searched further out
        let coarse_threshold = threshold.max(2.0 * self.voxel_size_m);

        let coarse = icp(
            &coarse_source.points,
            &coarse_target.points,
            initial,
            coarse_threshold,
            max_iterations,
        );

        let fine = icp(
            &source.points,
            &target.points,
            &coarse.transform,
            threshold,
            max_iterations,
        );

        Alignment {
            iterations: coarse.iterations + fine.iterations,
            ..fine
        }
    }
}

impl Aligner for CentroidSeeded {
    fn name(&self) -> &'static str {
        "centroid_seeded"
    }

    fn align(
        &self,
        source: &PointCloud,
        target: &PointCloud,
        initial: &Isometry3<f64>,
        threshold: f64,
        max_iterations: usize,
    ) -> Alignment {
        let seed = match (source.centroid(), target.centroid()) {
            (Some(s), Some(t)) => Isometry3::from_parts(
                Translation3::from(t - s),
                UnitQuaternion::identity(),
            ),
            _ => *initial,
        };

        icp(&source.points, &target.points, &seed, threshold, max_iterations)
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Run point-to-point ICP from `initial` for at most `max_iterations` iterations.
pub fn icp(
    source: &[Point3<f64>],
    target: &[Point3<f64>],
    initial: &Isometry3<f64>,
    threshold: f64,
    max_iterations: usize,
) -> Alignment {
    let grid = NeighbourGrid::new(target, threshold);
    let mut transform = *initial;
    let mut iterations = 0;

    for iter in 0..max_iterations {
        let pairs = correspondences(source, &grid, target, &transform, threshold);

        if pairs.is_empty() {
            trace!("ICP iteration {}: no correspondences", iter);
            break;
        }

        let update = best_fit(&pairs);
        transform = update * transform;
        iterations += 1;

        let step = update.translation.vector.norm() + update.rotation.angle();
        if step < UPDATE_EPSILON {
            break;
        }
    }

    Alignment {
        iterations,
        ..evaluate(source, &grid, target, &transform, threshold)
    }
}

/// Score a transform: fraction of source points with a target within `threshold`, and the RMS
/// distance of those inliers.
pub(crate) fn evaluate(
    source: &[Point3<f64>],
    grid: &NeighbourGrid,
    target: &[Point3<f64>],
    transform: &Isometry3<f64>,
    threshold: f64,
) -> Alignment {
    let pairs = correspondences(source, grid, target, transform, threshold);

    let fitness = if source.is_empty() {
        0.0
    } else {
        pairs.len() as f64 / source.len() as f64
    };

    let inlier_rmse = if pairs.is_empty() {
        0.0
    } else {
        let sum_sq: f64 = pairs.iter().map(|(s, t)| (t - s).norm_squared()).sum();
        (sum_sq / pairs.len() as f64).sqrt()
    };

    Alignment {
        transform: *transform,
        fitness,
        inlier_rmse,
        iterations: 0,
    }
}

/// Pair each transformed source point with its nearest target within the threshold.
fn correspondences(
    source: &[Point3<f64>],
    grid: &NeighbourGrid,
    target: &[Point3<f64>],
    transform: &Isometry3<f64>,
    threshold: f64,
) -> Vec<(Point3<f64>, Point3<f64>)> {
    source
        .iter()
        .filter_map(|p| {
            let moved = transform * p;
            grid.nearest_within(&moved, threshold)
                .map(|(i, _)| (moved, target[i]))
        })
        .collect()
}

/// Least squares rigid transform taking the first point of each pair onto the second.
///
/// Falls back to a pure translation when the pairs don't constrain rotation, e.g. when they
/// are all collinear.
fn best_fit(pairs: &[(Point3<f64>, Point3<f64>)]) -> Isometry3<f64> {
    let n = pairs.len() as f64;
    let src_mean = pairs.iter().fold(Vector3::zeros(), |a, (s, _)| a + s.coords) / n;
    let tgt_mean = pairs.iter().fold(Vector3::zeros(), |a, (_, t)| a + t.coords) / n;

    let translation_only = Isometry3::from_parts(
        Translation3::from(tgt_mean - src_mean),
        UnitQuaternion::identity(),
    );

    if pairs.len() < 3 {
        return translation_only;
    }

    // Cross covariance
    let mut h = Matrix3::zeros();
    for (s, t) in pairs {
        h += (s.coords - src_mean) * (t.coords - tgt_mean).transpose();
    }

    let svd = h.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return translation_only,
    };

    let sv = svd.singular_values;
    let mut sorted = [sv[0], sv[1], sv[2]];
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    if sorted[0] <= 0.0 || sorted[1] < RANK_EPSILON * sorted[0] {
        return translation_only;
    }

    // Flip the axis of the smallest singular value if the solution is a reflection
    let v = v_t.transpose();
    let mut correction = Matrix3::<f64>::identity();
    if (v * u.transpose()).determinant() < 0.0 {
        let smallest = (0..3)
            .min_by(|&a, &b| sv[a].partial_cmp(&sv[b]).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or(2);
        correction[(smallest, smallest)] = -1.0;
    }

    let r = v * correction * u.transpose();
    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(r));
    let t = tgt_mean - rotation * src_mean;

    Isometry3::from_parts(Translation3::from(t), rotation)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
