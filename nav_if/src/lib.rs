//! # Navigation Interface Library
//!
//! Types shared between the navigation core and the collaborators that feed
//! it: point clouds and frames from the LiDAR decoder, poses from the
//! ground truth log, and the traits those sources implement.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Point cloud, bounding box and frame types
pub mod cloud;

/// CSV backed frame source, ground truth and reference cloud loading
pub mod csv_source;

/// Vehicle pose type
pub mod pose;

/// Collaborator traits for frame and ground truth sources
pub mod source;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use cloud::{Bounds3, Frame, PointCloud};
pub use pose::Pose;
pub use source::{FrameSource, GroundTruth, MemoryFrameSource, MemoryGroundTruth, SourceError};
