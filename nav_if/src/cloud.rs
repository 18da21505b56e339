//! # Point Cloud
//!
//! Minimal point cloud container used throughout the navigation pipeline. Points are stored as
//! `f64` in whatever frame the owner decides (sensor, local, or submap), intensities are optional
//! and always kept parallel to the points.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{Isometry3, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A set of 3D points with optional per-point intensity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    pub points: Vec<Point3<f64>>,

    /// Per-point intensity, when present it has the same length as `points`.
    pub intensities: Option<Vec<f32>>,
}

/// Axis aligned box, inclusive on all faces.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds3 {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

/// A single decoded LiDAR scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Index of the frame in the full recording, aligned 1:1 with the ground truth.
    pub index: usize,

    /// Points in the sensor frame.
    pub cloud: PointCloud,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("Intensity count ({intensities}) does not match point count ({points})")]
    IntensityLengthMismatch { points: usize, intensities: usize },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PointCloud {
    pub fn new(points: Vec<Point3<f64>>) -> Self {
        Self {
            points,
            intensities: None,
        }
    }

    /// Build a cloud with intensities, which must be parallel to the points.
    pub fn with_intensities(
        points: Vec<Point3<f64>>,
        intensities: Vec<f32>,
    ) -> Result<Self, CloudError> {
        if points.len() != intensities.len() {
            return Err(CloudError::IntensityLengthMismatch {
                points: points.len(),
                intensities: intensities.len(),
            });
        }

        Ok(Self {
            points,
            intensities: Some(intensities),
        })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get the intensity of the point at `index`, if intensities are present.
    pub fn intensity(&self, index: usize) -> Option<f32> {
        self.intensities.as_ref().and_then(|i| i.get(index).copied())
    }

    /// Tight bounding box of the cloud, or `None` if the cloud is empty.
    pub fn bounds(&self) -> Option<Bounds3> {
        let first = self.points.first()?;
        let mut min = *first;
        let mut max = *first;

        for p in self.points.iter().skip(1) {
            for i in 0..3 {
                min[i] = min[i].min(p[i]);
                max[i] = max[i].max(p[i]);
            }
        }

        Some(Bounds3 { min, max })
    }

    /// Mean of all points, or `None` if the cloud is empty.
    pub fn centroid(&self) -> Option<Point3<f64>> {
        if self.points.is_empty() {
            return None;
        }

        let sum = self
            .points
            .iter()
            .fold(Vector3::zeros(), |acc, p| acc + p.coords);

        Some(Point3::from(sum / self.points.len() as f64))
    }

    /// Return a new cloud containing only the points inside `bounds`.
    pub fn crop(&self, bounds: &Bounds3) -> PointCloud {
        let mut points = Vec::new();
        let mut intensities = self.intensities.as_ref().map(|_| Vec::new());

        for (i, p) in self.points.iter().enumerate() {
            if bounds.contains(p) {
                points.push(*p);
                if let (Some(out), Some(src)) = (intensities.as_mut(), self.intensities.as_ref()) {
                    out.push(src[i]);
                }
            }
        }

        PointCloud {
            points,
            intensities,
        }
    }

    pub fn translate(&mut self, offset: &Vector3<f64>) {
        for p in self.points.iter_mut() {
            *p += offset;
        }
    }

    pub fn rotate(&mut self, rotation: &Rotation3<f64>) {
        for p in self.points.iter_mut() {
            *p = rotation * *p;
        }
    }

    pub fn transform(&mut self, iso: &Isometry3<f64>) {
        for p in self.points.iter_mut() {
            *p = iso * *p;
        }
    }

    pub fn transformed(&self, iso: &Isometry3<f64>) -> PointCloud {
        let mut out = self.clone();
        out.transform(iso);
        out
    }

    /// Append another cloud's points to this one.
    ///
    /// Intensities are kept only if both clouds carry them, or if this cloud was empty.
    pub fn extend(&mut self, other: PointCloud) {
        let was_empty = self.points.is_empty();
        self.intensities = match (self.intensities.take(), other.intensities) {
            (Some(mut a), Some(b)) => {
                a.extend(b);
                Some(a)
            }
            (None, Some(b)) if was_empty => Some(b),
            _ => None,
        };
        self.points.extend(other.points);
    }
}

impl Bounds3 {
    pub fn new(min: Point3<f64>, max: Point3<f64>) -> Self {
        Self { min, max }
    }

    /// Cube centred on `center` with the given half width on every axis.
    pub fn around(center: &Point3<f64>, half_width: f64) -> Self {
        let h = Vector3::repeat(half_width);
        Self {
            min: center - h,
            max: center + h,
        }
    }

    pub fn contains(&self, p: &Point3<f64>) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    /// True if `other` lies entirely inside this box.
    pub fn encloses(&self, other: &Bounds3) -> bool {
        self.contains(&other.min) && self.contains(&other.max)
    }

    pub fn center(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn translated(&self, offset: &Vector3<f64>) -> Bounds3 {
        Bounds3 {
            min: self.min + offset,
            max: self.max + offset,
        }
    }
}

impl std::fmt::Display for Bounds3 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[({:.2}, {:.2}, {:.2}) -> ({:.2}, {:.2}, {:.2})]",
            self.min.x, self.min.y, self.min.z, self.max.x, self.max.y, self.max.z
        )
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn line_cloud() -> PointCloud {
        PointCloud::with_intensities(
            (0..5).map(|i| Point3::new(i as f64, 0.0, 0.0)).collect(),
            vec![0.0, 1.0, 2.0, 3.0, 4.0],
        )
        .unwrap()
    }

    #[test]
    fn test_bounds_and_centroid() {
        let cloud = line_cloud();
        let b = cloud.bounds().unwrap();

        assert_eq!(b.min, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(b.max, Point3::new(4.0, 0.0, 0.0));
        assert_eq!(cloud.centroid().unwrap(), Point3::new(2.0, 0.0, 0.0));

        assert!(PointCloud::default().bounds().is_none());
        assert!(PointCloud::default().centroid().is_none());
    }

    #[test]
    fn test_crop_inclusive_keeps_intensity() {
        let cloud = line_cloud();
        let cropped = cloud.crop(&Bounds3::around(&Point3::new(2.0, 0.0, 0.0), 1.0));

        assert_eq!(cropped.len(), 3);
        assert_eq!(cropped.intensities, Some(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_intensity_mismatch() {
        assert!(PointCloud::with_intensities(vec![Point3::origin()], vec![]).is_err());
    }

    #[test]
    fn test_extend() {
        let mut a = PointCloud::default();
        a.extend(line_cloud());
        assert_eq!(a.len(), 5);
        assert!(a.intensities.is_some());

        a.extend(PointCloud::new(vec![Point3::origin()]));
        assert_eq!(a.len(), 6);
        assert!(a.intensities.is_none());
    }

    #[test]
    fn test_encloses() {
        let outer = Bounds3::around(&Point3::origin(), 2.0);
        let inner = Bounds3::around(&Point3::new(0.5, 0.5, 0.5), 1.0);
        let far = Bounds3::around(&Point3::new(3.0, 0.0, 0.0), 1.0);

        assert!(outer.encloses(&inner));
        assert!(!outer.encloses(&far));
    }
}
