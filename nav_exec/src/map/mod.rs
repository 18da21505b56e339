//! # Map accumulation module
//!
//! Registered frames are transformed into the local map frame and concatenated into the running
//! model. Growth is bounded by downsampling the whole model onto a voxel grid once a number of
//! frames have been merged since the last downsample. Downsampling replaces the model outright,
//! so nothing should keep hold of the model's points across a call to [`MapAccumulator::merge`]
//! or [`MapAccumulator::downsample`].

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod downsample;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::debug;
use nalgebra::Isometry3;
use nav_if::PointCloud;

use crate::params::MapParams;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use downsample::{voxel_downsample, voxel_index, VoxelIndex};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct MapAccumulator {
    params: MapParams,

    model: PointCloud,

    /// True if frames have been merged since the last downsample
    dirty: bool,

    /// Number of frames offered, used for the build stride
    num_offered: usize,

    /// Number of frames merged since the last downsample
    num_since_downsample: usize,

    num_merged: usize,
    num_downsamples: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MapAccumulator {
    pub fn new(params: MapParams) -> Self {
        Self {
            params,
            model: PointCloud::default(),
            dirty: false,
            num_offered: 0,
            num_since_downsample: 0,
            num_merged: 0,
            num_downsamples: 0,
        }
    }

    /// True if the accumulator builds a model at all.
    pub fn is_enabled(&self) -> bool {
        self.params.build_every > 0
    }

    /// Offer a registered frame to the model.
    ///
    /// `to_model` takes the frame's points into the model frame. Only every `build_every`th
    /// offered frame is merged, returns true if this one was.
    pub fn merge(&mut self, cloud: &PointCloud, to_model: &Isometry3<f64>) -> bool {
        let offered = self.num_offered;
        self.num_offered += 1;

        if !self.is_enabled() || offered % self.params.build_every != 0 {
            return false;
        }

        self.model.extend(cloud.transformed(to_model));
        self.dirty = true;
        self.num_merged += 1;
        self.num_since_downsample += 1;

        true
    }

    /// True once enough frames have been merged that the model should be downsampled.
    pub fn downsample_due(&self) -> bool {
        self.dirty
            && self.params.downsample_every > 0
            && self.num_since_downsample >= self.params.downsample_every
    }

    /// Replace the model with its voxel downsampled version and clear the dirty flag.
    pub fn downsample(&mut self) {
        let before = self.model.len();
        self.model = voxel_downsample(&self.model, self.params.voxel_size_m);
        self.dirty = false;
        self.num_since_downsample = 0;
        self.num_downsamples += 1;

        debug!(
            "Downsampled model from {} to {} points",
            before,
            self.model.len()
        );
    }

    /// Force a final downsample if needed, after which the model is coherent for export.
    pub fn finalise(&mut self) -> &PointCloud {
        if self.dirty {
            self.downsample();
        }
        &self.model
    }

    pub fn model(&self) -> &PointCloud {
        &self.model
    }

    pub fn into_model(self) -> PointCloud {
        self.model
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn num_merged(&self) -> usize {
        self.num_merged
    }

    pub fn num_downsamples(&self) -> usize {
        self.num_downsamples
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
