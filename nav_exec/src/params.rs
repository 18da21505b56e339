//! # Navigation parameters
//!
//! All tuning knobs of a navigation run. Loaded from a TOML file with [`util::params::load`],
//! every field has a default so a parameter file only needs to list what it changes.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::reg::RegistrationStrategy;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavExecParams {
    /// What frames are registered against
    pub mode: NavMode,

    /// Where the estimated heading comes from
    pub heading_source: HeadingSource,

    pub registration: RegistrationParams,

    pub submap: SubmapParams,

    pub map: MapParams,

    pub divergence: DivergenceParams,

    pub geofence: GeofenceParams,

    /// Maximum number of frames to process once running, 0 for no limit
    pub frame_limit: usize,

    /// Save a results checkpoint every this many frames, 0 to only checkpoint after the first
    /// frame
    pub checkpoint_every: usize,

    /// Frames registering with a fitness below this have their source and target clouds saved
    /// for inspection. 0 disables.
    pub frame_pair_fitness_threshold: f64,
}

/// Parameters of the registration convergence loop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationParams {
    pub strategy: RegistrationStrategy,

    /// Correspondence threshold of the first round
    pub initial_threshold_m: f64,

    /// Factor the threshold is multiplied by after each unconverged round
    pub threshold_growth: f64,

    /// Upper limit on the correspondence threshold
    pub max_threshold_m: f64,

    /// Iteration budget of each round
    pub iterations_per_round: usize,

    pub max_rounds: usize,

    /// A round whose transform translation changes less than this is converged
    pub tolerance_m: f64,

    /// Retry a loop which settled on an inexact alignment from the cloud centroids
    pub reseed_on_stall: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmapParams {
    /// Half width of the registration crop
    pub crop_radius_m: f64,

    /// Crops with fewer points than this are out of the map's bounds
    pub min_points: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapParams {
    /// Merge every Nth registered frame into the running model, 0 disables the model
    pub build_every: usize,

    pub voxel_size_m: f64,

    /// Number of merged frames between downsamples
    pub downsample_every: usize,
}

/// Ceilings that abort the run, values <= 0 disable the check
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DivergenceParams {
    pub max_error_2d_m: f64,
    pub max_error_3d_m: f64,
    pub max_movement_m: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeofenceParams {
    /// Number of frames to skip before running
    pub skip_start: usize,

    /// Skip frames until the ground truth enters this circle
    pub skip_until: Option<Circle>,

    /// Stop once the ground truth enters this circle
    pub run_until: Option<Circle>,
}

/// A circle in global coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub x: f64,
    pub y: f64,
    pub radius_m: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavMode {
    /// Register each frame against a crop of the reference map
    Absolute,

    /// Register each frame against the previous one
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadingSource {
    /// Copy the heading from the ground truth every frame
    GroundTruth,

    /// Integrate the yaw of the solved transforms
    Derived,
}

#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("Both a skip count ({0}) and a skip-until geofence are set")]
    ConflictingSkip(usize),

    #[error("{0} must be positive, got {1}")]
    NotPositive(&'static str, f64),

    #[error("{0} must be at least 1")]
    ZeroCount(&'static str),

    #[error("registration.threshold_growth must be at least 1, got {0}")]
    GrowthBelowOne(f64),

    #[error("Absolute navigation needs a reference map")]
    MissingReference,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl NavExecParams {
    /// Check the parameters are consistent with each other.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.geofence.skip_start > 0 && self.geofence.skip_until.is_some() {
            return Err(ParamsError::ConflictingSkip(self.geofence.skip_start));
        }

        for (name, circle) in &[
            ("geofence.skip_until.radius_m", self.geofence.skip_until),
            ("geofence.run_until.radius_m", self.geofence.run_until),
        ] {
            if let Some(c) = circle {
                if c.radius_m <= 0.0 {
                    return Err(ParamsError::NotPositive(*name, c.radius_m));
                }
            }
        }

        if self.submap.crop_radius_m <= 0.0 {
            return Err(ParamsError::NotPositive(
                "submap.crop_radius_m",
                self.submap.crop_radius_m,
            ));
        }

        if self.map.build_every > 0 && self.map.voxel_size_m <= 0.0 {
            return Err(ParamsError::NotPositive(
                "map.voxel_size_m",
                self.map.voxel_size_m,
            ));
        }

        let reg = &self.registration;
        if reg.initial_threshold_m <= 0.0 {
            return Err(ParamsError::NotPositive(
                "registration.initial_threshold_m",
                reg.initial_threshold_m,
            ));
        }
        if reg.tolerance_m <= 0.0 {
            return Err(ParamsError::NotPositive(
                "registration.tolerance_m",
                reg.tolerance_m,
            ));
        }
        if reg.threshold_growth < 1.0 {
            return Err(ParamsError::GrowthBelowOne(reg.threshold_growth));
        }
        if reg.max_rounds == 0 {
            return Err(ParamsError::ZeroCount("registration.max_rounds"));
        }
        if reg.iterations_per_round == 0 {
            return Err(ParamsError::ZeroCount("registration.iterations_per_round"));
        }

        Ok(())
    }
}

impl Default for NavExecParams {
    fn default() -> Self {
        Self {
            mode: NavMode::Absolute,
            heading_source: HeadingSource::GroundTruth,
            registration: RegistrationParams::default(),
            submap: SubmapParams::default(),
            map: MapParams::default(),
            divergence: DivergenceParams::default(),
            geofence: GeofenceParams::default(),
            frame_limit: 0,
            checkpoint_every: 100,
            frame_pair_fitness_threshold: 0.0,
        }
    }
}

impl Default for RegistrationParams {
    fn default() -> Self {
        Self {
            strategy: RegistrationStrategy::PointToPoint,
            initial_threshold_m: 1.0,
            threshold_growth: 1.5,
            max_threshold_m: 5.0,
            iterations_per_round: 25,
            max_rounds: 10,
            tolerance_m: 1e-4,
            reseed_on_stall: true,
        }
    }
}

impl Default for SubmapParams {
    fn default() -> Self {
        Self {
            crop_radius_m: 30.0,
            min_points: 10,
        }
    }
}

impl Default for MapParams {
    fn default() -> Self {
        Self {
            build_every: 1,
            voxel_size_m: 0.1,
            downsample_every: 10,
        }
    }
}

impl Default for DivergenceParams {
    fn default() -> Self {
        Self {
            max_error_2d_m: 200.0,
            max_error_3d_m: 200.0,
            max_movement_m: 100.0,
        }
    }
}

impl Circle {
    pub fn new(x: f64, y: f64, radius_m: f64) -> Self {
        Self { x, y, radius_m }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_toml() {
        let params: NavExecParams = util::params::from_str(
            r#"
            mode = "incremental"
            frame_limit = 50

            [registration]
            strategy = { type = "downsample_first", voxel_size_m = 0.25 }
            max_rounds = 4

            [geofence]
            run_until = { x = 10.0, y = 20.0, radius_m = 5.0 }
            "#,
        )
        .unwrap();

        assert_eq!(params.mode, NavMode::Incremental);
        assert_eq!(params.heading_source, HeadingSource::GroundTruth);
        assert_eq!(params.frame_limit, 50);
        assert_eq!(params.registration.max_rounds, 4);
        assert_eq!(params.registration.iterations_per_round, 25);
        assert_eq!(
            params.registration.strategy,
            RegistrationStrategy::DownsampleFirst { voxel_size_m: 0.25 }
        );
        assert_eq!(params.geofence.run_until, Some(Circle::new(10.0, 20.0, 5.0)));
        assert_eq!(params.submap.min_points, 10);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        let mut params = NavExecParams::default();
        assert!(params.validate().is_ok());

        params.geofence.skip_start = 5;
        params.geofence.skip_until = Some(Circle::new(0.0, 0.0, 1.0));
        assert!(matches!(
            params.validate(),
            Err(ParamsError::ConflictingSkip(5))
        ));

        params.geofence.skip_start = 0;
        params.geofence.skip_until = Some(Circle::new(0.0, 0.0, -1.0));
        assert!(matches!(
            params.validate(),
            Err(ParamsError::NotPositive(_, _))
        ));

        let mut params = NavExecParams::default();
        params.registration.max_rounds = 0;
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_validate_registration_loop() {
        let mut params = NavExecParams::default();
        params.registration.threshold_growth = -1.5;
        assert!(matches!(
            params.validate(),
            Err(ParamsError::GrowthBelowOne(g)) if g == -1.5
        ));

        params.registration.threshold_growth = 0.5;
        assert!(matches!(
            params.validate(),
            Err(ParamsError::GrowthBelowOne(_))
        ));

        // A constant threshold is allowed
        params.registration.threshold_growth = 1.0;
        assert!(params.validate().is_ok());

        params.registration.tolerance_m = 0.0;
        assert!(matches!(
            params.validate(),
            Err(ParamsError::NotPositive("registration.tolerance_m", _))
        ));
    }
}
