//! # Navigation library.
//!
//! LiDAR pose estimation and map maintenance. Frames are registered either against the previous
//! frame (incremental odometry) or against a georeferenced reference map (absolute
//! localisation), the solved transforms advance a pose estimate which is compared against ground
//! truth, and registered frames are merged into a running model.
//!
//! This library allows the `nav_exec` binary, benchmarks and other crates in the workspace to
//! access items defined inside the navigation crate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Running model accumulation and voxel downsampling
pub mod map;

/// Navigation session - the frame loop state machine, geofencing and results
pub mod nav;

/// Navigation parameters
pub mod params;

/// Registration - aligners and the convergence controller
pub mod reg;

/// Submap cache - local crops of the reference map
pub mod submap;

/// Trajectory tracking and drift statistics
pub mod traj;
