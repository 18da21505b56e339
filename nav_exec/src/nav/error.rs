//! Session level fatal errors

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use nav_if::SourceError;

use super::geofence::GeofenceError;
use crate::params::ParamsError;
use crate::submap::SubmapError;
use crate::traj::TrackerError;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors which end a navigation session.
///
/// The session catches all of these at the frame loop, finalises whatever has been gathered so
/// far and reports them alongside the partial results.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("Vehicle left the reference map: {0}")]
    OutOfBounds(SubmapError),

    #[error("Estimate diverged: {0}")]
    Divergence(TrackerError),

    #[error("{0}")]
    GeofenceNeverEntered(GeofenceError),

    #[error("Invalid configuration: {0}")]
    ConfigConflict(ParamsError),

    #[error(
        "Frame stream ended after {frames_read} frames while skipping to start frame {start_frame}"
    )]
    UnexpectedEndOfStream {
        frames_read: usize,
        start_frame: usize,
    },

    #[error("Could not read from the frame or ground truth source: {0}")]
    Source(SourceError),

    #[error("No ground truth pose for frame {frame_index} ({num_poses} poses loaded)")]
    GroundTruthMissing {
        frame_index: usize,
        num_poses: usize,
    },

    #[error("Interrupted by the operator after frame {0:?}")]
    Interrupted(Option<usize>),
}
