//! Voxel grid downsampling

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::collections::HashMap;

use nalgebra::{Point3, Vector3};
use nav_if::PointCloud;

// ---------------------------------------------------------------------------
// TYPES
// ---------------------------------------------------------------------------

/// Integer coordinates of a voxel
pub type VoxelIndex = (i64, i64, i64);

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Get the index of the voxel containing the given point.
pub fn voxel_index(point: &Point3<f64>, voxel_size: f64) -> VoxelIndex {
    (
        (point.x / voxel_size).floor() as i64,
        (point.y / voxel_size).floor() as i64,
        (point.z / voxel_size).floor() as i64,
    )
}

/// Replace all points falling in the same voxel by their centroid.
///
/// Output points are ordered by the first point seen in each voxel, so the result is
/// deterministic for a given input. Intensities are averaged the same way as positions.
///
/// A non-positive voxel size returns the input unchanged.
pub fn voxel_downsample(cloud: &PointCloud, voxel_size: f64) -> PointCloud {
    if voxel_size <= 0.0 || cloud.is_empty() {
        return cloud.clone();
    }

    // Voxel index -> slot in the accumulators
    let mut slots: HashMap<VoxelIndex, usize> = HashMap::with_capacity(cloud.len() / 4);
    let mut sums: Vec<(Vector3<f64>, f64, usize)> = Vec::new();

    for (i, p) in cloud.points.iter().enumerate() {
        let intensity = cloud.intensity(i).map(|v| v as f64).unwrap_or(0.0);
        let slot = *slots.entry(voxel_index(p, voxel_size)).or_insert_with(|| {
            sums.push((Vector3::zeros(), 0.0, 0));
            sums.len() - 1
        });

        let acc = &mut sums[slot];
        acc.0 += p.coords;
        acc.1 += intensity;
        acc.2 += 1;
    }

    let points = sums
        .iter()
        .map(|(sum, _, n)| Point3::from(sum / *n as f64))
        .collect();

    let intensities = cloud.intensities.as_ref().map(|_| {
        sums.iter()
            .map(|(_, isum, n)| (isum / *n as f64) as f32)
            .collect()
    });

    PointCloud {
        points,
        intensities,
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
