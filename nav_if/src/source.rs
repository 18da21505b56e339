//! # Collaborator Sources
//!
//! Traits implemented by whatever decodes LiDAR frames and ground truth poses for the navigation
//! core, plus simple in-memory implementations used for synthetic runs.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::Vector3;
use std::collections::VecDeque;
use std::path::PathBuf;

use crate::{Frame, Pose};

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A sequential, lazily decoded stream of LiDAR frames.
pub trait FrameSource {
    /// Get the next frame, or `None` at the end of the stream.
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Index of the frame most recently returned by `next_frame`.
    fn current_frame_index(&self) -> Option<usize>;

    /// True if the frame most recently returned is the first one of a new input file.
    ///
    /// Consecutive input files are not spatially continuous so the pose estimate has to be
    /// re-anchored when this is set.
    fn is_first_frame_of_source_file(&self) -> bool;

    /// Name of the input file the current frame came from, if known.
    fn current_source_name(&self) -> Option<String> {
        None
    }
}

/// Trusted trajectory used to measure drift.
pub trait GroundTruth {
    /// Poses for every frame of the recording, aligned 1:1 with frame indices.
    fn coordinates_for_all_frames(&self) -> Result<Vec<Pose>, SourceError>;

    /// Offset between the ground truth's local frame and the global frame, if known.
    fn offset(&self) -> Option<Vector3<f64>>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Frame source backed by a queue of frames already in memory.
#[derive(Debug, Default)]
pub struct MemoryFrameSource {
    frames: VecDeque<(Frame, bool)>,
    current_index: Option<usize>,
    current_is_first: bool,
}

/// Ground truth backed by a vector of poses.
#[derive(Debug, Clone, Default)]
pub struct MemoryGroundTruth {
    pub poses: Vec<Pose>,
    pub offset: Option<Vector3<f64>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Could not read {0:?}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("Could not parse CSV data from {0:?}: {1}")]
    Csv(PathBuf, csv::Error),

    #[error("Could not parse metadata from {0:?}: {1}")]
    Meta(PathBuf, serde_json::Error),

    #[error("No frames found in {0:?}")]
    NoFrames(PathBuf),

    #[error("Invalid data in {0:?}: {1}")]
    InvalidData(PathBuf, String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MemoryFrameSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame onto the back of the stream, `first_of_file` marks an input file boundary.
    pub fn push(&mut self, frame: Frame, first_of_file: bool) {
        self.frames.push_back((frame, first_of_file));
    }

    /// Build a source from a single continuous file's worth of frames.
    pub fn from_frames<I: IntoIterator<Item = Frame>>(frames: I) -> Self {
        let mut source = Self::new();
        for (i, f) in frames.into_iter().enumerate() {
            source.push(f, i == 0);
        }
        source
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for MemoryFrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        match self.frames.pop_front() {
            Some((frame, first)) => {
                self.current_index = Some(frame.index);
                self.current_is_first = first;
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    fn current_frame_index(&self) -> Option<usize> {
        self.current_index
    }

    fn is_first_frame_of_source_file(&self) -> bool {
        self.current_is_first
    }
}

impl MemoryGroundTruth {
    pub fn new(poses: Vec<Pose>) -> Self {
        Self {
            poses,
            offset: None,
        }
    }
}

impl GroundTruth for MemoryGroundTruth {
    fn coordinates_for_all_frames(&self) -> Result<Vec<Pose>, SourceError> {
        Ok(self.poses.clone())
    }

    fn offset(&self) -> Option<Vector3<f64>> {
        self.offset
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
