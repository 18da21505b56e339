//! # Submap cache
//!
//! Registration against the reference map only needs the part of the map around the vehicle.
//! Cropping a reference cloud of tens of millions of points every frame is too slow, so the
//! cache keeps a staging crop of half width `2R` around the pose it was taken at, and derives
//! the tight crop of half width `R` from it. The staging crop is retaken once the vehicle has
//! moved `0.8R` or more from its centre. The tight crop always equals a crop of the full
//! reference cloud.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::debug;
use nalgebra::Point3;
use nav_if::{Bounds3, PointCloud, Pose};

use crate::params::SubmapParams;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Staging crop half width as a multiple of the crop radius
const STAGING_SCALE: f64 = 2.0;

/// Distance from the staging centre, as a multiple of the crop radius, at which the staging
/// crop is retaken
const REFRESH_SCALE: f64 = 0.8;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct SubmapCache {
    params: SubmapParams,

    staging: Option<Staging>,

    num_refreshes: usize,
}

/// Large crop of the reference cloud, in reference coordinates
struct Staging {
    center: Point3<f64>,
    cloud: PointCloud,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, thiserror::Error)]
pub enum SubmapError {
    /// The crop around the pose doesn't hold enough of the reference map to register against.
    #[error(
        "Frame {}: crop {crop} around {center} holds {num_points} points (minimum {min_points}), \
        reference map extents {}",
        .center.frame_index,
        extents_str(.reference_extents)
    )]
    OutOfBounds {
        center: Pose,
        crop: Bounds3,
        reference_extents: Option<Bounds3>,
        num_points: usize,
        min_points: usize,
    },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SubmapCache {
    pub fn new(params: SubmapParams) -> Self {
        Self {
            params,
            staging: None,
            num_refreshes: 0,
        }
    }

    pub fn crop_radius(&self) -> f64 {
        self.params.crop_radius_m
    }

    /// Get the crop of `reference` around `center`, translated so the centre is at the origin.
    pub fn extract(
        &mut self,
        reference: &PointCloud,
        center: &Pose,
    ) -> Result<PointCloud, SubmapError> {
        let radius = self.params.crop_radius_m;
        let center_pt = center.point();

        let stale = match &self.staging {
            Some(s) => (s.center - center_pt).norm() >= REFRESH_SCALE * radius,
            None => true,
        };

        if stale {
            let cloud = reference.crop(&Bounds3::around(&center_pt, STAGING_SCALE * radius));
            debug!(
                "Refreshed staging crop at {} ({} points)",
                center,
                cloud.len()
            );
            self.staging = Some(Staging {
                center: center_pt,
                cloud,
            });
            self.num_refreshes += 1;
        }

        let crop = Bounds3::around(&center_pt, radius);
        let mut tight = match &self.staging {
            Some(s) => s.cloud.crop(&crop),
            None => reference.crop(&crop),
        };

        if tight.len() < self.params.min_points {
            return Err(SubmapError::OutOfBounds {
                center: *center,
                crop,
                reference_extents: reference.bounds(),
                num_points: tight.len(),
                min_points: self.params.min_points,
            });
        }

        tight.translate(&-center_pt.coords);

        Ok(tight)
    }

    /// Drop the staging crop so the next extraction recrops the full reference.
    pub fn invalidate(&mut self) {
        self.staging = None;
    }

    pub fn num_refreshes(&self) -> usize {
        self.num_refreshes
    }
}

fn extents_str(extents: &Option<Bounds3>) -> String {
    match extents {
        Some(b) => b.to_string(),
        None => String::from("(empty)"),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    /// 100m x 100m ground plane with a 0.5m spacing and some relief
    fn reference() -> PointCloud {
        let mut points = Vec::new();
        for i in 0..200 {
            for j in 0..200 {
                let x = i as f64 * 0.5;
                let y = j as f64 * 0.5;
                points.push(Point3::new(x, y, (x * 0.1).sin() + (y * 0.07).cos()));
            }
        }
        PointCloud::new(points)
    }

    fn params() -> SubmapParams {
        SubmapParams {
            crop_radius_m: 10.0,
            min_points: 10,
        }
    }

    #[test]
    fn test_transparent_to_brute_force() {
        let reference = reference();
        let mut cache = SubmapCache::new(params());

        // Wander along a path, including altitude changes
        for k in 0..60 {
            let pose = Pose::new(
                20.0 + k as f64 * 0.9,
                30.0 + (k as f64 * 0.3).sin() * 6.0,
                (k as f64 * 0.5).cos() * 3.0,
            );

            let crop = cache.extract(&reference, &pose).unwrap();
            let brute = reference.crop(&Bounds3::around(&pose.point(), 10.0));

            assert_eq!(crop.len(), brute.len());
            for (c, b) in crop.points.iter().zip(brute.points.iter()) {
                // Translated back, every point is inside the box and matches the brute force
                let back = c + pose.position();
                assert!((back - b).norm() < 1e-9);
                assert!(c.x.abs() <= 10.0 + 1e-9);
                assert!(c.y.abs() <= 10.0 + 1e-9);
                assert!(c.z.abs() <= 10.0 + 1e-9);
            }
        }

        // Staging crops are reused across several frames
        assert!(cache.num_refreshes() > 1);
        assert!(cache.num_refreshes() < 30);
    }

    #[test]
    fn test_refresh_threshold() {
        let reference = reference();
        let mut cache = SubmapCache::new(params());

        cache.extract(&reference, &Pose::new(50.0, 50.0, 0.0)).unwrap();
        cache.extract(&reference, &Pose::new(57.9, 50.0, 0.0)).unwrap();
        assert_eq!(cache.num_refreshes(), 1);

        cache.extract(&reference, &Pose::new(58.0, 50.0, 0.0)).unwrap();
        assert_eq!(cache.num_refreshes(), 2);

        cache.invalidate();
        cache.extract(&reference, &Pose::new(58.0, 50.0, 0.0)).unwrap();
        assert_eq!(cache.num_refreshes(), 3);
    }

    #[test]
    fn test_out_of_bounds() {
        let reference = reference();
        let mut cache = SubmapCache::new(params());

        let far = Pose::new(500.0, 500.0, 0.0).with_frame_index(42);
        match cache.extract(&reference, &far) {
            Err(SubmapError::OutOfBounds {
                center,
                crop,
                reference_extents,
                num_points,
                min_points,
            }) => {
                assert_eq!(center.frame_index, 42);
                assert_eq!(num_points, 0);
                assert_eq!(min_points, 10);
                assert_eq!(crop, Bounds3::around(&far.point(), 10.0));
                assert!(reference_extents.is_some());
            }
            other => panic!("Expected out of bounds, got {:?}", other.map(|c| c.len())),
        }
    }

    #[test]
    fn test_edge_of_map() {
        let reference = reference();
        let mut cache = SubmapCache::new(params());

        // Corner of the map still holds a quarter of a crop
        let crop = cache.extract(&reference, &Pose::new(0.0, 0.0, 0.0)).unwrap();
        assert_eq!(crop.len(), 21 * 21);
    }
}
