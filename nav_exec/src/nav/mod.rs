//! # Navigation session
//!
//! The top level frame loop. A session moves through
//!
//! ```text
//! Initializing -> SkippingToStart -> Running -> Finished
//!                                            \-> Aborted
//! ```
//!
//! Each frame in `Running` is registered either against a crop of the reference map (absolute
//! mode) or against the previous frame (incremental mode). The solved transform advances the
//! pose estimate held by the [`TrajectoryTracker`], and the registered frame is merged into the
//! running model. Every step returns a [`FrameOutcome`] or a [`FatalError`]. Fatal errors move
//! the session to `Aborted`, but the partial results and model are always returned.
//!
//! Registration geometry: a source point `p` maps into the local map frame as
//! `center + R_tgt * T * (R_src * p)`, where `T` is the solved transform. In absolute mode
//! `R_src` is the heading pre-rotation, `R_tgt` is identity and `center` is the current
//! estimate. In incremental mode `R_src` is identity, `R_tgt` is the previous frame's heading
//! rotation and `center` is the previous estimate.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod error;
mod geofence;
mod results;
mod timer;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, error, info, warn};
use nalgebra::{Isometry3, Rotation3, Translation3, UnitQuaternion, Vector3};
use nav_if::{Frame, FrameSource, GroundTruth, PointCloud, Pose};
use serde::Serialize;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use util::{archive::Archiver, session::Session};

use crate::{
    map::MapAccumulator,
    params::{HeadingSource, NavExecParams, NavMode, ParamsError},
    reg::{Aligner, RegistrationController, RegistrationInput},
    submap::SubmapCache,
    traj::{FrameMotion, TrajectoryTracker},
};

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use error::FatalError;
pub use geofence::{find_first_frame_entering_circle, GeofenceError};
pub use results::{ArchiveRow, FramePair, NavOutput, NavResults, RunStatus};
pub use timer::TaskTimer;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const STAGE_FRAME: &str = "frame extraction";
const STAGE_SUBMAP: &str = "submap extraction";
const STAGE_REGISTRATION: &str = "registration";
const STAGE_BOOK_KEEPING: &str = "book keeping";
const STAGE_MERGE: &str = "map merging";
const STAGE_DOWNSAMPLE: &str = "downsampling";
const STAGE_CHECKPOINT: &str = "checkpoint";

/// Session relative path of the results checkpoint
const CHECKPOINT_PATH: &str = "checkpoint.json";

/// Session relative path of the final results
const RESULTS_PATH: &str = "results.json";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct NavigationSession {
    params: NavExecParams,
    state: NavState,

    controller: RegistrationController,
    tracker: TrajectoryTracker,
    submap: SubmapCache,
    map: MapAccumulator,
    timer: TaskTimer,

    /// Reference map in local coordinates, needed in absolute mode
    reference: Option<PointCloud>,
    reference_offset: Option<Vector3<f64>>,

    /// Ground truth in local coordinates, indexed by frame
    actual_poses: Vec<Pose>,

    /// Local origin offset
    offset: Vector3<f64>,

    start_frame: usize,
    stop_frame: Option<usize>,

    frames_read: usize,
    last_frame_index: Option<usize>,

    /// Registration prior, the last solved transform
    prior: Isometry3<f64>,

    /// Previous frame in incremental mode
    previous: Option<PointCloud>,

    /// Frame read while skipping which is the first one to run on
    pending: Option<SourcedFrame>,

    session: Option<Session>,
    archiver: Option<Archiver>,
    interrupt: Option<Arc<AtomicBool>>,
}

/// A frame along with what the source said about it when it was read.
struct SourcedFrame {
    frame: Frame,
    first_of_file: bool,
    source_name: Option<String>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NavState {
    Initializing,
    SkippingToStart,
    Running,
    Finished,
    Aborted,
}

/// Result of a single step of the running frame loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame anchored the estimate without being registered
    Seeded { frame_index: usize },

    /// The frame was registered and the estimate advanced
    Registered { frame_index: usize },

    /// The frame was processed and the run-until geofence has been reached
    StopReached { frame_index: usize },

    /// The frame limit has been reached, no frame was read
    FrameLimitReached,

    /// The source has no more frames
    EndOfStream,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl NavigationSession {
    /// Create a new session using the registration strategy from the parameters.
    pub fn new(params: NavExecParams) -> Self {
        Self {
            controller: RegistrationController::new(params.registration.clone()),
            tracker: TrajectoryTracker::new(params.divergence.clone(), params.heading_source),
            submap: SubmapCache::new(params.submap.clone()),
            map: MapAccumulator::new(params.map.clone()),
            timer: TaskTimer::new(),
            state: NavState::Initializing,
            reference: None,
            reference_offset: None,
            actual_poses: Vec::new(),
            offset: Vector3::zeros(),
            start_frame: 0,
            stop_frame: None,
            frames_read: 0,
            last_frame_index: None,
            prior: Isometry3::identity(),
            previous: None,
            pending: None,
            session: None,
            archiver: None,
            interrupt: None,
            params,
        }
    }

    /// Replace the registration strategy with the given aligner.
    pub fn with_aligner(mut self, aligner: Box<dyn Aligner>) -> Self {
        self.controller =
            RegistrationController::with_aligner(self.params.registration.clone(), aligner);
        self
    }

    /// Set the reference map, in local coordinates relative to `offset` if one is given.
    pub fn with_reference(mut self, cloud: PointCloud, offset: Option<Vector3<f64>>) -> Self {
        self.reference = Some(cloud);
        self.reference_offset = offset;
        self
    }

    /// Attach a session for checkpoints, results and frame pairs.
    pub fn with_session(mut self, session: Session) -> Self {
        self.session = Some(session);
        self
    }

    /// Archive every registered frame to a CSV file.
    pub fn with_archiver(mut self, archiver: Archiver) -> Self {
        self.archiver = Some(archiver);
        self
    }

    /// Stop at the next frame once the flag is set.
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Run the whole session, returning the results whether the run finished or not.
    pub fn run(mut self, source: &mut dyn FrameSource, ground_truth: &dyn GroundTruth) -> NavOutput {
        let result = self.run_frames(source, ground_truth);
        self.finish(result)
    }

    fn run_frames(
        &mut self,
        source: &mut dyn FrameSource,
        ground_truth: &dyn GroundTruth,
    ) -> Result<(), FatalError> {
        self.initialize(ground_truth)?;

        if self.state == NavState::SkippingToStart {
            self.skip_to_start(source)?;
        }

        loop {
            match self.step(source)? {
                FrameOutcome::Seeded { .. } | FrameOutcome::Registered { .. } => (),
                FrameOutcome::StopReached { frame_index } => {
                    info!("Reached the run-until geofence at frame {}", frame_index);
                    return Ok(());
                }
                FrameOutcome::FrameLimitReached => {
                    info!("Reached the frame limit of {}", self.params.frame_limit);
                    return Ok(());
                }
                FrameOutcome::EndOfStream => {
                    info!("End of frame stream after {} frames", self.frames_read);
                    return Ok(());
                }
            }
        }
    }

    /// Load the ground truth, fix the local offset and work out the start and stop frames.
    pub fn initialize(&mut self, ground_truth: &dyn GroundTruth) -> Result<(), FatalError> {
        self.params.validate().map_err(FatalError::ConfigConflict)?;

        if self.params.mode == NavMode::Absolute && self.reference.is_none() {
            return Err(FatalError::ConfigConflict(ParamsError::MissingReference));
        }

        let poses = ground_truth
            .coordinates_for_all_frames()
            .map_err(FatalError::Source)?;

        self.offset = match self.params.mode {
            NavMode::Absolute => self
                .reference_offset
                .or_else(|| ground_truth.offset())
                .unwrap_or_else(Vector3::zeros),
            NavMode::Incremental => ground_truth
                .offset()
                .unwrap_or_else(|| mean_position(&poses)),
        };

        self.actual_poses = poses
            .iter()
            .enumerate()
            .map(|(i, p)| p.to_local(&self.offset).with_frame_index(i))
            .collect();

        info!(
            "Loaded {} ground truth poses, local offset ({:.3}, {:.3}, {:.3})",
            self.actual_poses.len(),
            self.offset.x,
            self.offset.y,
            self.offset.z
        );

        let geofence = &self.params.geofence;

        self.start_frame = match geofence.skip_until {
            Some(circle) => find_first_frame_entering_circle(
                &self.actual_poses,
                &circle.to_local(&self.offset),
                0,
            )
            .map_err(FatalError::GeofenceNeverEntered)?,
            None => geofence.skip_start,
        };

        self.stop_frame = match geofence.run_until {
            Some(circle) => Some(
                find_first_frame_entering_circle(
                    &self.actual_poses,
                    &circle.to_local(&self.offset),
                    self.start_frame + 1,
                )
                .map_err(FatalError::GeofenceNeverEntered)?,
            ),
            None => None,
        };

        info!(
            "Running from frame {} until {}",
            self.start_frame,
            match self.stop_frame {
                Some(s) => format!("frame {}", s),
                None => String::from("the end of the stream"),
            }
        );

        if self.start_frame > 0 {
            self.set_state(NavState::SkippingToStart);
        } else {
            self.set_state(NavState::Running);
        }

        Ok(())
    }

    /// Read and discard frames until the start frame.
    pub fn skip_to_start(&mut self, source: &mut dyn FrameSource) -> Result<(), FatalError> {
        while self.state == NavState::SkippingToStart {
            self.check_interrupt()?;

            let frame = match source.next_frame().map_err(FatalError::Source)? {
                Some(f) => f,
                None => {
                    return Err(FatalError::UnexpectedEndOfStream {
                        frames_read: self.frames_read,
                        start_frame: self.start_frame,
                    })
                }
            };
            self.frames_read += 1;
            self.last_frame_index = Some(frame.index);

            if frame.index >= self.start_frame {
                self.pending = Some(SourcedFrame {
                    first_of_file: source.is_first_frame_of_source_file(),
                    source_name: source.current_source_name(),
                    frame,
                });
                self.set_state(NavState::Running);
            } else if frame.index % 100 == 0 {
                debug!("Skipped to frame {}", frame.index);
            }
        }

        Ok(())
    }

    /// Process the next frame.
    pub fn step(&mut self, source: &mut dyn FrameSource) -> Result<FrameOutcome, FatalError> {
        self.check_interrupt()?;

        if self.params.frame_limit > 0 && self.frames_processed() >= self.params.frame_limit {
            return Ok(FrameOutcome::FrameLimitReached);
        }

        self.timer.reset();

        let SourcedFrame {
            frame,
            first_of_file,
            source_name,
        } = match self.pending.take() {
            Some(p) => p,
            None => match source.next_frame().map_err(FatalError::Source)? {
                Some(frame) => {
                    self.frames_read += 1;
                    SourcedFrame {
                        first_of_file: source.is_first_frame_of_source_file(),
                        source_name: source.current_source_name(),
                        frame,
                    }
                }
                None => return Ok(FrameOutcome::EndOfStream),
            },
        };

        self.timer.time(STAGE_FRAME);

        let frame_index = frame.index;
        self.last_frame_index = Some(frame_index);
        let actual = self.actual_pose(frame_index)?;

        // Anchor the estimate at the start and at input file boundaries
        if self.frames_processed() == 0 {
            info!("Anchoring estimate at {}", actual);
            self.tracker.reanchor(&actual);
            self.reset_continuity();
        } else if first_of_file {
            self.tracker.reanchor(&actual);
            self.reset_continuity();
        }

        let outcome = match (self.params.mode, self.previous.take()) {
            (NavMode::Incremental, None) => {
                let estimate = *self.tracker.estimate();
                self.tracker.seed(estimate, &actual);
                self.previous = Some(frame.cloud);
                FrameOutcome::Seeded { frame_index }
            }
            (_, previous) => {
                self.register_frame(frame, previous, &actual, source_name)?;
                FrameOutcome::Registered { frame_index }
            }
        };

        self.checkpoint();

        match self.stop_frame {
            Some(stop) if frame_index >= stop => Ok(FrameOutcome::StopReached { frame_index }),
            _ => Ok(outcome),
        }
    }

    fn register_frame(
        &mut self,
        frame: Frame,
        previous: Option<PointCloud>,
        actual: &Pose,
        source_name: Option<String>,
    ) -> Result<(), FatalError> {
        let estimate = *self.tracker.estimate();
        let heading = match self.params.heading_source {
            HeadingSource::GroundTruth => actual.heading,
            HeadingSource::Derived => estimate.heading,
        };

        let (target, yaw, target_rotation) = match (self.params.mode, previous) {
            (NavMode::Incremental, Some(previous)) => (previous, None, estimate.yaw_rotation()),
            _ => {
                let reference = match &self.reference {
                    Some(r) => r,
                    None => return Err(FatalError::ConfigConflict(ParamsError::MissingReference)),
                };
                let crop = self
                    .submap
                    .extract(reference, &estimate.with_frame_index(frame.index))
                    .map_err(FatalError::OutOfBounds)?;
                self.timer.time(STAGE_SUBMAP);

                let yaw = estimate.with_heading(heading).corrected_heading();
                (crop, Some(yaw), Rotation3::identity())
            }
        };

        let result = self.controller.register(RegistrationInput {
            source: &frame.cloud,
            target: &target,
            prior: &self.prior,
            yaw,
            frame_index: frame.index,
            source_name: source_name.clone(),
        });
        let registration_time_s = self.timer.time(STAGE_REGISTRATION);

        self.prior = result.transform;

        let threshold = self.params.frame_pair_fitness_threshold;
        if threshold > 0.0 && result.fitness < threshold {
            warn!(
                "Frame {} registered with a low fitness of {:.4} (rmse {:.4} m)",
                frame.index, result.fitness, result.inlier_rmse
            );
            if let Some(session) = &self.session {
                session.save_with_timestamp(
                    format!("frame_pairs/frame_{}.json", frame.index),
                    FramePair {
                        frame_index: frame.index,
                        source_name,
                        fitness: result.fitness,
                        inlier_rmse: result.inlier_rmse,
                        transform: result.transform,
                        source: frame.cloud.clone(),
                        target: target.clone(),
                    },
                );
            }
        }

        let source_rotation = match yaw {
            Some(y) => Rotation3::from_axis_angle(&Vector3::z_axis(), y),
            None => Rotation3::identity(),
        };
        let to_model = Isometry3::from_parts(
            Translation3::from(estimate.position()),
            UnitQuaternion::from_rotation_matrix(&target_rotation),
        ) * result.transform
            * Isometry3::from_parts(
                Translation3::identity(),
                UnitQuaternion::from_rotation_matrix(&source_rotation),
            );

        let motion = FrameMotion {
            movement: target_rotation * result.transform.translation.vector,
            yaw: result.transform.rotation.euler_angles().2,
            registration: result,
            registration_time_s,
        };

        let update = self.tracker.update(&motion, actual).map(ArchiveRow::from);
        self.timer.time(STAGE_BOOK_KEEPING);
        let row = update.map_err(FatalError::Divergence)?;

        debug!(
            "Frame {}: moved {:.3} m, fitness {:.4}, error 2D {:.3} m, along {:.3} m, across {:.3} m",
            row.frame_index, row.movement_m, row.fitness, row.error_2d_m, row.along_m, row.across_m
        );

        if let Some(archiver) = self.archiver.as_mut() {
            if let Err(e) = archiver.serialise(row) {
                warn!("Could not archive frame {}: {}", frame.index, e);
            }
        }

        if self.map.merge(&frame.cloud, &to_model) {
            self.timer.time(STAGE_MERGE);
        }
        if self.map.downsample_due() {
            self.map.downsample();
            self.timer.time(STAGE_DOWNSAMPLE);
        }

        if self.params.mode == NavMode::Incremental {
            self.previous = Some(frame.cloud);
        }

        Ok(())
    }

    /// Finalise the model and build the results, moving to `Finished` or `Aborted`.
    pub fn finish(mut self, result: Result<(), FatalError>) -> NavOutput {
        let (status, error) = match result {
            Ok(()) => {
                self.set_state(NavState::Finished);
                (RunStatus::Finished, None)
            }
            Err(e) => {
                error!("Navigation aborted: {}", e);
                self.set_state(NavState::Aborted);
                (RunStatus::Failed, Some(e))
            }
        };

        self.timer.reset();
        self.map.finalise();
        self.timer.time(STAGE_DOWNSAMPLE);

        let results = self.results(status, error.as_ref());

        info!("Navigation summary:\n{}", results.summary);

        if let Some(session) = &self.session {
            session.save(RESULTS_PATH, results.clone());
        }

        NavOutput {
            results,
            model: self.map.into_model(),
            error,
        }
    }

    /// Snapshot of the results so far.
    pub fn results(&self, status: RunStatus, error: Option<&FatalError>) -> NavResults {
        NavResults {
            status,
            final_state: self.state,
            error: error.map(|e| e.to_string()),
            aligner: self.controller.aligner_name(),
            offset: self.offset,
            start_frame: self.start_frame,
            stop_frame: self.stop_frame,
            frames_processed: self.frames_processed(),
            model_points: self.map.model().len(),
            estimated_trajectory: self.tracker.estimated_path().to_vec(),
            actual_trajectory: self.tracker.actual_path().to_vec(),
            frames: self.tracker.records().to_vec(),
            registrations: self.controller.records().to_vec(),
            summary: self.tracker.summary(),
            timings_s: self.timer.timings().clone(),
            params: self.params.clone(),
        }
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    /// Number of frames processed while running, one per trajectory vertex.
    pub fn frames_processed(&self) -> usize {
        self.tracker.estimated_path().len()
    }

    pub fn offset(&self) -> &Vector3<f64> {
        &self.offset
    }

    fn checkpoint(&mut self) {
        let n = self.frames_processed();
        let every = self.params.checkpoint_every;

        if n == 1 || (every > 0 && n % every == 0) {
            if let Some(session) = &self.session {
                session.save(CHECKPOINT_PATH, self.results(RunStatus::Running, None));
                self.timer.time(STAGE_CHECKPOINT);
            }
        }
    }

    /// Forget the motion prior and previous frame, used when the estimate is anchored.
    fn reset_continuity(&mut self) {
        self.prior = Isometry3::identity();
        self.previous = None;
    }

    fn actual_pose(&self, frame_index: usize) -> Result<Pose, FatalError> {
        self.actual_poses
            .get(frame_index)
            .copied()
            .ok_or(FatalError::GroundTruthMissing {
                frame_index,
                num_poses: self.actual_poses.len(),
            })
    }

    fn check_interrupt(&self) -> Result<(), FatalError> {
        match &self.interrupt {
            Some(flag) if flag.load(Ordering::Relaxed) => {
                Err(FatalError::Interrupted(self.last_frame_index))
            }
            _ => Ok(()),
        }
    }

    fn set_state(&mut self, state: NavState) {
        info!("NavState: {:?} -> {:?}", self.state, state);
        self.state = state;
    }
}

/// Mean position of a set of poses, zero if there are none.
fn mean_position(poses: &[Pose]) -> Vector3<f64> {
    if poses.is_empty() {
        return Vector3::zeros();
    }

    poses.iter().fold(Vector3::zeros(), |acc, p| acc + p.position()) / poses.len() as f64
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::params::Circle;
    use crate::reg::Alignment;
    use crate::submap::SubmapError;
    use nalgebra::Point3;
    use nav_if::{MemoryFrameSource, MemoryGroundTruth};
    use std::f64::consts::FRAC_PI_2;

    /// Aligner returning the same transform whatever it's given.
    struct FixedAligner(Isometry3<f64>);

    impl Aligner for FixedAligner {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn align(
            &self,
            _: &PointCloud,
            _: &PointCloud,
            _: &Isometry3<f64>,
            _: f64,
            _: usize,
        ) -> Alignment {
            Alignment {
                transform: self.0,
                fitness: 1.0,
                inlier_rmse: 0.0,
                iterations: 1,
            }
        }
    }

    fn fixed(x: f64) -> Box<dyn Aligner> {
        Box::new(FixedAligner(Isometry3::translation(x, 0.0, 0.0)))
    }

    fn tiny_cloud() -> PointCloud {
        PointCloud::new(vec![
            Point3::new(1.0, 0.0, 0.0),
            Point3::new(0.0, 1.0, 0.0),
            Point3::new(0.0, 0.0, 1.0),
        ])
    }

    fn frames(n: usize) -> MemoryFrameSource {
        MemoryFrameSource::from_frames((0..n).map(|index| Frame {
            index,
            cloud: tiny_cloud(),
        }))
    }

    /// Heading east at 1 m per frame
    fn eastward(n: usize) -> MemoryGroundTruth {
        MemoryGroundTruth::new(
            (0..n)
                .map(|i| Pose::new(i as f64, 0.0, 0.0).with_heading(FRAC_PI_2))
                .collect(),
        )
    }

    fn incremental() -> NavExecParams {
        let mut params = NavExecParams::default();
        params.mode = NavMode::Incremental;
        params
    }

    #[test]
    fn test_incremental_tracks_ground_truth() {
        let gt = eastward(10);
        let output = NavigationSession::new(incremental())
            .with_aligner(fixed(1.0))
            .run(&mut frames(10), &gt);

        let results = &output.results;
        assert_eq!(results.status, RunStatus::Finished);
        assert_eq!(results.final_state, NavState::Finished);
        assert!(output.error.is_none());
        assert_eq!(results.aligner, "fixed");

        assert_eq!(results.estimated_trajectory.len(), 10);
        assert_eq!(results.actual_trajectory.len(), 10);

        // The first frame only seeds
        assert_eq!(results.frames.len(), 9);
        assert_eq!(results.registrations.len(), 9);
        assert!(results.summary.final_error_2d_m.unwrap() < 1e-9);
        assert!((results.summary.total_distance_m - 9.0).abs() < 1e-9);

        assert!(!output.model.is_empty());
        assert_eq!(results.model_points, output.model.len());
    }

    #[test]
    fn test_heading_rotates_motion() {
        // Heading north, the sensor's forward motion must map onto +y
        let gt = MemoryGroundTruth::new(
            (0..5)
                .map(|i| Pose::new(0.0, i as f64, 0.0).with_heading(0.0))
                .collect(),
        );

        let output = NavigationSession::new(incremental())
            .with_aligner(fixed(1.0))
            .run(&mut frames(5), &gt);

        let global = output.results.estimated_trajectory_global();
        let last = global.last().unwrap();
        assert!(last.x.abs() < 1e-9);
        assert!((last.y - 4.0).abs() < 1e-9);
        assert!(output.results.summary.error_2d_m.unwrap().max < 1e-9);
    }

    #[test]
    fn test_divergence_ceiling() {
        let mut params = incremental();
        params.divergence.max_movement_m = 100.0;

        let output = NavigationSession::new(params.clone())
            .with_aligner(fixed(80.0))
            .run(&mut frames(3), &eastward(3));
        assert_eq!(output.results.status, RunStatus::Finished);
        assert!(output.error.is_none());

        params.divergence.max_movement_m = 50.0;
        let output = NavigationSession::new(params)
            .with_aligner(fixed(80.0))
            .run(&mut frames(3), &eastward(3));

        assert_eq!(output.results.status, RunStatus::Failed);
        assert_eq!(output.results.final_state, NavState::Aborted);
        assert!(matches!(output.error, Some(FatalError::Divergence(_))));
        assert!(output.results.error.is_some());
        assert!(output.results.estimated_trajectory.len() >= 1);
    }

    #[test]
    fn test_failed_results_serialise() {
        let mut params = incremental();
        params.divergence.max_error_2d_m = 5.0;

        let output = NavigationSession::new(params)
            .with_aligner(fixed(3.0))
            .run(&mut frames(10), &eastward(10));

        // Drift grows by 2 m a frame, the third registered frame trips the ceiling
        let json = serde_json::to_value(&output.results).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["final_state"], "Aborted");
        assert_eq!(json["frames"].as_array().unwrap().len(), 3);
        assert_eq!(json["estimated_trajectory"].as_array().unwrap().len(), 4);
        assert!(json["error"].as_str().unwrap().contains("2D error"));
        assert_eq!(json["params"]["mode"], "incremental");
    }

    #[test]
    fn test_skip_and_run_until() {
        let mut params = incremental();
        params.geofence.skip_start = 5;
        params.geofence.run_until = Some(Circle::new(12.0, 0.0, 0.5));

        let output = NavigationSession::new(params)
            .with_aligner(fixed(1.0))
            .run(&mut frames(20), &eastward(20));

        let results = &output.results;
        assert_eq!(results.status, RunStatus::Finished);
        assert_eq!(results.start_frame, 5);
        assert_eq!(results.stop_frame, Some(12));
        assert_eq!(results.estimated_trajectory.len(), 8);
        assert_eq!(results.estimated_trajectory[0].frame_index, 5);
        assert_eq!(results.actual_trajectory.last().unwrap().frame_index, 12);
        assert!(results.summary.final_error_2d_m.unwrap() < 1e-9);
    }

    #[test]
    fn test_skip_until_geofence() {
        let mut params = incremental();
        params.geofence.skip_until = Some(Circle::new(3.2, 0.1, 0.5));

        let output = NavigationSession::new(params)
            .with_aligner(fixed(1.0))
            .run(&mut frames(10), &eastward(10));

        assert_eq!(output.results.start_frame, 3);
        assert_eq!(output.results.estimated_trajectory.len(), 7);
    }

    #[test]
    fn test_geofence_never_entered() {
        let mut params = incremental();
        params.geofence.run_until = Some(Circle::new(0.0, 50.0, 2.0));

        let output = NavigationSession::new(params)
            .with_aligner(fixed(1.0))
            .run(&mut frames(10), &eastward(10));

        assert_eq!(output.results.status, RunStatus::Failed);
        assert!(matches!(
            output.error,
            Some(FatalError::GeofenceNeverEntered(_))
        ));
        assert!(output.results.estimated_trajectory.is_empty());
    }

    #[test]
    fn test_conflicting_skip() {
        let mut params = incremental();
        params.geofence.skip_start = 2;
        params.geofence.skip_until = Some(Circle::new(3.0, 0.0, 0.5));

        let output = NavigationSession::new(params).run(&mut frames(10), &eastward(10));

        assert!(matches!(
            output.error,
            Some(FatalError::ConfigConflict(ParamsError::ConflictingSkip(2)))
        ));
    }

    #[test]
    fn test_absolute_needs_reference() {
        let output = NavigationSession::new(NavExecParams::default())
            .run(&mut frames(3), &eastward(3));

        assert!(matches!(
            output.error,
            Some(FatalError::ConfigConflict(ParamsError::MissingReference))
        ));
    }

    #[test]
    fn test_end_of_stream_while_skipping() {
        let mut params = incremental();
        params.geofence.skip_start = 15;

        let output = NavigationSession::new(params)
            .with_aligner(fixed(1.0))
            .run(&mut frames(10), &eastward(20));

        assert!(matches!(
            output.error,
            Some(FatalError::UnexpectedEndOfStream {
                frames_read: 10,
                start_frame: 15
            })
        ));
        assert_eq!(output.results.final_state, NavState::Aborted);
    }

    #[test]
    fn test_frame_limit() {
        let mut params = incremental();
        params.frame_limit = 4;

        let output = NavigationSession::new(params)
            .with_aligner(fixed(1.0))
            .run(&mut frames(10), &eastward(10));

        assert_eq!(output.results.status, RunStatus::Finished);
        assert_eq!(output.results.frames_processed, 4);
    }

    #[test]
    fn test_missing_ground_truth() {
        let output = NavigationSession::new(incremental())
            .with_aligner(fixed(1.0))
            .run(&mut frames(10), &eastward(6));

        assert!(matches!(
            output.error,
            Some(FatalError::GroundTruthMissing {
                frame_index: 6,
                num_poses: 6
            })
        ));
        assert_eq!(output.results.estimated_trajectory.len(), 6);
    }

    #[test]
    fn test_interrupt() {
        let flag = Arc::new(AtomicBool::new(true));
        let output = NavigationSession::new(incremental())
            .with_aligner(fixed(1.0))
            .with_interrupt(flag)
            .run(&mut frames(10), &eastward(10));

        assert!(matches!(output.error, Some(FatalError::Interrupted(None))));
        assert_eq!(output.results.status, RunStatus::Failed);
    }

    #[test]
    fn test_reanchor_at_file_boundary() {
        // Two files, the second starting 100 m further on
        let mut source = MemoryFrameSource::new();
        for index in 0..10 {
            source.push(
                Frame {
                    index,
                    cloud: tiny_cloud(),
                },
                index == 0 || index == 5,
            );
        }
        let gt = MemoryGroundTruth::new(
            (0..10)
                .map(|i| {
                    let x = if i < 5 { i as f64 } else { 100.0 + i as f64 };
                    Pose::new(x, 0.0, 0.0).with_heading(FRAC_PI_2)
                })
                .collect(),
        );

        // Overestimate each step by 10 cm, the drift at the boundary is kept
        let output = NavigationSession::new(incremental())
            .with_aligner(fixed(1.1))
            .run(&mut source, &gt);

        let est = output.results.estimated_trajectory_global();
        assert_eq!(est.len(), 10);
        assert!((est[4].x - 4.4).abs() < 1e-9);
        assert!((est[5].x - 105.4).abs() < 1e-9);
        assert!((est[9].x - 109.8).abs() < 1e-9);

        // Both first frames only seed
        assert_eq!(output.results.frames.len(), 8);
    }

    /// Smooth terrain in local coordinates
    fn terrain() -> PointCloud {
        let mut points = Vec::new();
        for i in 0..161 {
            for j in 0..161 {
                let x = i as f64 * 0.25 - 15.0;
                let y = j as f64 * 0.25 - 15.0;
                points.push(Point3::new(x, y, 2.0 * (0.3 * x).sin() * (0.4 * y).cos()));
            }
        }
        PointCloud::new(points)
    }

    /// Scan of the terrain around a pose, in the sensor frame
    fn scan(terrain: &PointCloud, pose: &Pose, range: f64) -> PointCloud {
        let to_sensor = pose.yaw_rotation().inverse();
        let mut cloud = terrain.crop(&nav_if::Bounds3::around(&pose.point(), range));
        cloud.translate(&-pose.position());
        cloud.rotate(&to_sensor);
        cloud
    }

    #[test]
    fn test_absolute_localisation() {
        let terrain = terrain();
        let offset = Vector3::new(1000.0, 2000.0, 50.0);

        // Drive 10 cm per frame along a compass heading of 1 rad
        let heading = 1.0;
        let yaw = FRAC_PI_2 - heading;
        let local: Vec<Pose> = (0..10)
            .map(|i| {
                let d = i as f64 * 0.1;
                Pose::new(d * yaw.cos(), d * yaw.sin(), 0.0).with_heading(heading)
            })
            .collect();

        let mut source = MemoryFrameSource::from_frames(
            local
                .iter()
                .enumerate()
                .map(|(index, p)| Frame {
                    index,
                    cloud: scan(&terrain, p, 8.0),
                }),
        );
        let gt = MemoryGroundTruth::new(local.iter().map(|p| p.to_global(&offset)).collect());

        let mut params = NavExecParams::default();
        params.submap.crop_radius_m = 10.0;
        params.registration.initial_threshold_m = 0.5;
        params.map.voxel_size_m = 0.5;
        params.map.downsample_every = 5;

        let output = NavigationSession::new(params)
            .with_reference(terrain, Some(offset))
            .run(&mut source, &gt);

        let results = &output.results;
        assert!(output.error.is_none(), "{:?}", output.error);
        assert_eq!(results.offset, offset);
        assert_eq!(results.estimated_trajectory.len(), 10);
        assert_eq!(results.frames.len(), 10);
        assert!(results.summary.error_3d_m.unwrap().max < 1e-6);
        assert!((results.summary.fitness.unwrap().min - 1.0).abs() < 1e-12);

        let global = results.estimated_trajectory_global();
        assert!((global[9].x - (1000.0 + 0.9 * yaw.cos())).abs() < 1e-6);

        assert!(output.model.len() > 0);
        assert!(results.timings_s.contains_key(STAGE_REGISTRATION));
        assert!(results.timings_s.contains_key(STAGE_SUBMAP));
    }

    #[test]
    fn test_absolute_leaves_map() {
        let offset = Vector3::new(1000.0, 2000.0, 50.0);

        // Heading east 10 m a frame, the terrain ends at x = 25 m
        let local: Vec<Pose> = (0..6)
            .map(|i| Pose::new(i as f64 * 10.0, 0.0, 0.0).with_heading(FRAC_PI_2))
            .collect();
        let gt = MemoryGroundTruth::new(local.iter().map(|p| p.to_global(&offset)).collect());

        let mut params = NavExecParams::default();
        params.submap.crop_radius_m = 2.0;

        let output = NavigationSession::new(params)
            .with_aligner(fixed(10.0))
            .with_reference(terrain(), Some(offset))
            .run(&mut frames(6), &gt);

        // Frames 0 to 2 each move the estimate 10 m, frame 3 is cropped around x = 30 m
        assert_eq!(output.results.status, RunStatus::Failed);
        assert_eq!(output.results.final_state, NavState::Aborted);
        assert_eq!(output.results.estimated_trajectory.len(), 3);
        assert_eq!(output.results.frames.len(), 3);

        match &output.error {
            Some(FatalError::OutOfBounds(SubmapError::OutOfBounds {
                center, num_points, ..
            })) => {
                assert_eq!(center.frame_index, 3);
                assert!((center.x - 30.0).abs() < 1e-9);
                assert_eq!(*num_points, 0);
            }
            other => panic!("expected an out of bounds error, got {:?}", other),
        }
        assert!(output.results.error.as_ref().unwrap().contains("Frame 3:"));
        assert!(output.model.len() > 0);
    }
}
