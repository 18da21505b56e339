//! # Registration controller
//!
//! A single fixed-threshold ICP call is unreliable when the prior is poor or the scene is
//! sparse, so the controller calls the aligner repeatedly. Each round is given a small iteration
//! budget, and its output transform is fed back in as the next round's prior until the
//! translation stops moving. Rounds that don't settle loosen the correspondence threshold by
//! `threshold_growth`, up to `max_threshold_m`.
//!
//! A loop can also settle in a local minimum, typically when the prior is far off and part of the
//! source pairs with the nearest edge of the target. When the settled alignment is not an exact
//! fit the loop is run once more, seeded by lining up the cloud centroids under the prior's
//! rotation, and the reseeded alignment is kept only if it scores strictly better.
//!
//! Every call appends a [`RegistrationRecord`] to the controller's log for auditing after the
//! run.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, trace};
use nalgebra::{Isometry3, Rotation3, Translation3, Vector3};
use nav_if::PointCloud;
use serde::Serialize;
use std::time::Instant;

use super::{build_aligner, Aligner, Alignment, RegistrationResult};
use crate::params::RegistrationParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct RegistrationController {
    params: RegistrationParams,
    aligner: Box<dyn Aligner>,

    /// One record per call to `register`
    records: Vec<RegistrationRecord>,
}

/// Inputs of a single registration.
pub struct RegistrationInput<'a> {
    /// Frame being registered, in the sensor frame
    pub source: &'a PointCloud,

    /// Previous frame or map crop
    pub target: &'a PointCloud,

    /// Starting guess, usually the previous frame's solution
    pub prior: &'a Isometry3<f64>,

    /// Yaw to pre-rotate the source by before aligning, in radians counter-clockwise from +x
    pub yaw: Option<f64>,

    pub frame_index: usize,

    /// Input file the frame came from, if known
    pub source_name: Option<String>,
}

/// Threshold, delta and iteration history of the rounds run so far.
#[derive(Debug, Default)]
struct Rounds {
    thresholds_m: Vec<f64>,
    deltas_m: Vec<f64>,
    iterations: usize,
}

/// Outcome of one run of the convergence loop.
#[derive(Debug, Clone, Copy)]
struct Settled {
    alignment: Alignment,

    /// Threshold of the last round run
    threshold: f64,
    converged: bool,
}

/// Diagnostic record of one registration.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationRecord {
    pub frame_index: usize,
    pub source_name: Option<String>,
    pub aligner: &'static str,
    pub rounds: usize,

    /// Aligner iterations performed, summed over all rounds
    pub iterations: usize,

    /// Correspondence threshold used in each round
    pub thresholds_m: Vec<f64>,

    /// Translation change produced by each round
    pub deltas_m: Vec<f64>,

    pub converged: bool,
    pub reseeded: bool,
    pub fitness: f64,
    pub inlier_rmse: f64,

    /// Wall clock time spent in the aligner
    pub time_s: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RegistrationController {
    /// Create a controller using the aligner selected in the parameters.
    pub fn new(params: RegistrationParams) -> Self {
        let aligner = build_aligner(params.strategy);
        Self::with_aligner(params, aligner)
    }

    /// Create a controller around an existing aligner, ignoring the strategy in the parameters.
    pub fn with_aligner(params: RegistrationParams, aligner: Box<dyn Aligner>) -> Self {
        Self {
            params,
            aligner,
            records: Vec::new(),
        }
    }

    pub fn aligner_name(&self) -> &'static str {
        self.aligner.name()
    }

    /// Register the source onto the target through the convergence loop.
    ///
    /// The returned transform is expressed on the pre-rotated source if a yaw was given.
    pub fn register(&mut self, input: RegistrationInput) -> RegistrationResult {
        let start = Instant::now();

        let rotated;
        let source = match input.yaw {
            Some(yaw) => {
                let mut s = input.source.clone();
                s.rotate(&Rotation3::from_axis_angle(&Vector3::z_axis(), yaw));
                rotated = s;
                &rotated
            }
            None => input.source,
        };

        let mut rounds = Rounds::default();
        let settled = self.settle(
            source,
            input.target,
            input.prior,
            self.params.initial_threshold_m,
            self.params.max_rounds,
            input.frame_index,
            &mut rounds,
        );

        let mut accepted = settled;
        let mut reseeded = false;

        let rounds_left = self.params.max_rounds.saturating_sub(rounds.deltas_m.len());
        if self.params.reseed_on_stall
            && settled.converged
            && !self.is_exact(&settled.alignment)
            && rounds_left > 0
        {
            if let Some(seed) = centroid_seed(source, input.target, input.prior) {
                let retry = self.settle(
                    source,
                    input.target,
                    &seed,
                    settled.threshold,
                    rounds_left,
                    input.frame_index,
                    &mut rounds,
                );

                debug!(
                    "Frame {} reseeded from centroids: fitness {:.4} -> {:.4}, rmse {:.4} -> {:.4}",
                    input.frame_index,
                    settled.alignment.fitness,
                    retry.alignment.fitness,
                    settled.alignment.inlier_rmse,
                    retry.alignment.inlier_rmse
                );

                if retry.converged && scores_better(&retry.alignment, &settled.alignment) {
                    accepted = retry;
                    reseeded = true;
                }
            }
        }

        let result = RegistrationResult {
            transform: accepted.alignment.transform,
            fitness: accepted.alignment.fitness,
            inlier_rmse: accepted.alignment.inlier_rmse,
            iterations_used: rounds.iterations,
            rounds: rounds.deltas_m.len(),
            converged: accepted.converged,
            reseeded,
        };

        self.records.push(RegistrationRecord {
            frame_index: input.frame_index,
            source_name: input.source_name,
            aligner: self.aligner.name(),
            rounds: result.rounds,
            iterations: result.iterations_used,
            thresholds_m: rounds.thresholds_m,
            deltas_m: rounds.deltas_m,
            converged: result.converged,
            reseeded,
            fitness: result.fitness,
            inlier_rmse: result.inlier_rmse,
            time_s: util::time::std_duration_to_seconds(start.elapsed()),
        });

        result
    }

    pub fn records(&self) -> &[RegistrationRecord] {
        &self.records
    }

    pub fn last_record(&self) -> Option<&RegistrationRecord> {
        self.records.last()
    }

    /// Run the convergence loop from `prior` for at most `max_rounds` rounds.
    ///
    /// Each round is fed the previous round's transform. The loop settles once a round moves
    /// the translation less than the tolerance, otherwise the threshold grows towards its cap.
    #[allow(clippy::too_many_arguments)]
    fn settle(
        &self,
        source: &PointCloud,
        target: &PointCloud,
        prior: &Isometry3<f64>,
        initial_threshold: f64,
        max_rounds: usize,
        frame_index: usize,
        rounds: &mut Rounds,
    ) -> Settled {
        let max_threshold = self.params.max_threshold_m.max(self.params.initial_threshold_m);
        let mut threshold = initial_threshold;

        let mut current = Alignment {
            transform: *prior,
            fitness: 0.0,
            inlier_rmse: 0.0,
            iterations: 0,
        };

        for _ in 0..max_rounds {
            let next = self.aligner.align(
                source,
                target,
                &current.transform,
                threshold,
                self.params.iterations_per_round,
            );

            let delta = (next.transform.translation.vector
                - current.transform.translation.vector)
                .norm();

            trace!(
                "Frame {} round {}: threshold {:.3} m, delta {:.6} m, fitness {:.4}, {} iterations",
                frame_index,
                rounds.deltas_m.len(),
                threshold,
                delta,
                next.fitness,
                next.iterations
            );

            rounds.thresholds_m.push(threshold);
            rounds.deltas_m.push(delta);
            rounds.iterations += next.iterations;
            current = next;

            if delta < self.params.tolerance_m {
                return Settled {
                    alignment: current,
                    threshold,
                    converged: true,
                };
            }

            threshold = (threshold * self.params.threshold_growth).min(max_threshold);
        }

        Settled {
            alignment: current,
            threshold,
            converged: false,
        }
    }

    /// Every source point paired and the pairs coincide to within the tolerance.
    fn is_exact(&self, alignment: &Alignment) -> bool {
        alignment.fitness >= 1.0 && alignment.inlier_rmse <= self.params.tolerance_m
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Transform keeping the prior's rotation and moving the rotated source centroid onto the
/// target centroid.
fn centroid_seed(
    source: &PointCloud,
    target: &PointCloud,
    prior: &Isometry3<f64>,
) -> Option<Isometry3<f64>> {
    let s = source.centroid()?;
    let t = target.centroid()?;

    Some(Isometry3::from_parts(
        Translation3::from(t.coords - prior.rotation * s.coords),
        prior.rotation,
    ))
}

/// Higher fitness wins, equal fitness falls back to the lower RMSE.
fn scores_better(a: &Alignment, b: &Alignment) -> bool {
    a.fitness > b.fitness || (a.fitness == b.fitness && a.inlier_rmse < b.inlier_rmse)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::reg::RegistrationStrategy;
    use nalgebra::Point3;

    fn unit_square() -> PointCloud {
        let mut points = Vec::new();
        for i in 0..10 {
            for j in 0..10 {
                points.push(Point3::new(i as f64 / 9.0, j as f64 / 9.0, 0.0));
            }
        }
        PointCloud::new(points)
    }

    fn surface() -> PointCloud {
        let mut points = Vec::new();
        for i in 0..21 {
            for j in 0..21 {
                let x = i as f64 * 0.1 - 1.0;
                let y = j as f64 * 0.1 - 1.0;
                points.push(Point3::new(x, y, x.sin() * y.cos()));
            }
        }
        PointCloud::new(points)
    }

    fn params(strategy: RegistrationStrategy) -> RegistrationParams {
        RegistrationParams {
            strategy,
            initial_threshold_m: 1.0,
            threshold_growth: 1.5,
            max_threshold_m: 3.0,
            iterations_per_round: 25,
            max_rounds: 10,
            tolerance_m: 1e-4,
            reseed_on_stall: true,
        }
    }

    fn input<'a>(
        source: &'a PointCloud,
        target: &'a PointCloud,
        prior: &'a Isometry3<f64>,
    ) -> RegistrationInput<'a> {
        RegistrationInput {
            source,
            target,
            prior,
            yaw: None,
            frame_index: 7,
            source_name: None,
        }
    }

    /// Aligner stepping a fixed translation from whatever it's given.
    struct Drifting;

    impl Aligner for Drifting {
        fn name(&self) -> &'static str {
            "drifting"
        }

        fn align(
            &self,
            _: &PointCloud,
            _: &PointCloud,
            initial: &Isometry3<f64>,
            _: f64,
            max_iterations: usize,
        ) -> Alignment {
            Alignment {
                transform: Isometry3::translation(1.0, 0.0, 0.0) * initial,
                fitness: 0.5,
                inlier_rmse: 0.1,
                iterations: max_iterations,
            }
        }
    }

    #[test]
    fn test_unit_square_offset() {
        let source = unit_square();
        let mut target = source.clone();
        target.translate(&Vector3::new(1.0, 0.0, 0.0));

        let mut ctrl = RegistrationController::new(RegistrationParams::default());
        let prior = Isometry3::identity();
        let result = ctrl.register(input(&source, &target, &prior));

        assert!(result.converged);
        assert!(result.rounds <= 10);
        assert!((result.transform.translation.vector - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-3);
        assert!((result.fitness - 1.0).abs() < 1e-12);

        // Point-to-point from the identity settles short of the offset, the reseed recovers it
        assert!(result.reseeded);

        let record = ctrl.last_record().unwrap();
        assert_eq!(record.frame_index, 7);
        assert_eq!(record.aligner, "point_to_point");
        assert!(record.reseeded);
        assert_eq!(record.thresholds_m.len(), result.rounds);
        assert_eq!(record.deltas_m.len(), result.rounds);
        assert!(result.iterations_used > 0);
        assert!(result.iterations_used <= result.rounds * 25);
    }

    #[test]
    fn test_unit_square_offset_centroid_seeded() {
        let source = unit_square();
        let mut target = source.clone();
        target.translate(&Vector3::new(1.0, 0.0, 0.0));

        let mut ctrl = RegistrationController::new(params(RegistrationStrategy::CentroidSeeded));
        let prior = Isometry3::identity();
        let result = ctrl.register(input(&source, &target, &prior));

        assert!(result.converged);
        assert!(!result.reseeded);
        assert!((result.transform.translation.vector - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-3);
    }

    #[test]
    fn test_reseed_disabled_keeps_local_minimum() {
        let source = unit_square();
        let mut target = source.clone();
        target.translate(&Vector3::new(1.0, 0.0, 0.0));

        let mut reg = params(RegistrationStrategy::PointToPoint);
        reg.reseed_on_stall = false;
        let mut ctrl = RegistrationController::new(reg);
        let prior = Isometry3::identity();
        let result = ctrl.register(input(&source, &target, &prior));

        assert!(result.converged);
        assert!(!result.reseeded);
        assert!(result.inlier_rmse > 1e-3);
        assert!((result.transform.translation.vector - Vector3::new(1.0, 0.0, 0.0)).norm() > 1e-2);
    }

    #[test]
    fn test_deterministic_and_settling() {
        let source = surface();
        let mut target = source.clone();
        target.translate(&Vector3::new(0.02, -0.01, 0.015));

        let mut ctrl = RegistrationController::new(params(RegistrationStrategy::PointToPoint));
        let prior = Isometry3::identity();
        let a = ctrl.register(input(&source, &target, &prior));
        let b = ctrl.register(input(&source, &target, &prior));

        assert_eq!(a.transform, b.transform);
        assert_eq!(a.fitness, b.fitness);
        assert!(a.converged);
        assert!(!a.reseeded);

        let deltas = &ctrl.records()[0].deltas_m;
        assert!(deltas.last().unwrap() <= deltas.first().unwrap());
        assert_eq!(ctrl.records().len(), 2);
    }

    #[test]
    fn test_iterations_are_counted_not_budgeted() {
        let source = surface();
        let mut target = source.clone();
        target.translate(&Vector3::new(0.02, -0.01, 0.015));

        let mut ctrl = RegistrationController::new(params(RegistrationStrategy::PointToPoint));
        let prior = Isometry3::identity();
        let result = ctrl.register(input(&source, &target, &prior));

        // A small translation is solved in a handful of iterations, well under the budget
        assert!(result.iterations_used > 0);
        assert!(result.iterations_used < result.rounds * 25);
        assert_eq!(ctrl.last_record().unwrap().iterations, result.iterations_used);
    }

    #[test]
    fn test_threshold_growth_capped() {
        let mut ctrl = RegistrationController::with_aligner(
            params(RegistrationStrategy::PointToPoint),
            Box::new(Drifting),
        );
        let cloud = unit_square();
        let prior = Isometry3::identity();
        let result = ctrl.register(input(&cloud, &cloud, &prior));

        assert!(!result.converged);
        assert!(!result.reseeded);
        assert_eq!(result.rounds, 10);
        assert_eq!(result.iterations_used, 250);

        let thresholds = &ctrl.last_record().unwrap().thresholds_m;
        assert_eq!(thresholds[0], 1.0);
        assert_eq!(thresholds[1], 1.5);
        assert!(thresholds.iter().all(|t| *t <= 3.0));
        assert_eq!(*thresholds.last().unwrap(), 3.0);
    }

    #[test]
    fn test_yaw_prerotation() {
        // Source is the target rotated by -90 degrees, pre-rotation by +90 undoes it
        let target = surface();
        let mut source = target.clone();
        source.rotate(&Rotation3::from_axis_angle(
            &Vector3::z_axis(),
            -std::f64::consts::FRAC_PI_2,
        ));

        let mut ctrl = RegistrationController::new(params(RegistrationStrategy::PointToPoint));
        let prior = Isometry3::identity();
        let mut inp = input(&source, &target, &prior);
        inp.yaw = Some(std::f64::consts::FRAC_PI_2);
        let result = ctrl.register(inp);

        assert!(result.transform.translation.vector.norm() < 1e-6);
        assert!(result.transform.rotation.angle() < 1e-6);
        assert!((result.fitness - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_centroid_seed_keeps_prior_rotation() {
        let source = PointCloud::new(vec![Point3::new(1.0, 0.0, 0.0), Point3::new(3.0, 0.0, 0.0)]);
        let target = PointCloud::new(vec![Point3::new(5.0, 5.0, 0.0)]);
        let prior = Isometry3::rotation(Vector3::z() * std::f64::consts::FRAC_PI_2);

        let seed = centroid_seed(&source, &target, &prior).unwrap();

        assert_eq!(seed.rotation, prior.rotation);
        let moved = seed * Point3::new(2.0, 0.0, 0.0);
        assert!((moved - Point3::new(5.0, 5.0, 0.0)).norm() < 1e-12);
        assert!(centroid_seed(&PointCloud::default(), &target, &prior).is_none());
    }
}
