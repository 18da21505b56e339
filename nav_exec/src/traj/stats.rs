//! Summary statistics of a run

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::Serialize;

use super::FrameRecord;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Fitness at or below which a registration counts as imperfect
const IMPERFECT_FITNESS: f64 = 0.95;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MinMeanMax {
    pub min: f64,
    pub mean: f64,
    pub max: f64,
}

/// Statistics over all registered frames of a run.
///
/// Fields are `None` when no frame was registered.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryStats {
    pub num_frames: usize,

    /// Sum of the per-frame movement
    pub total_distance_m: f64,

    pub movement_m: Option<MinMeanMax>,
    pub registration_time_s: Option<MinMeanMax>,
    pub fitness: Option<MinMeanMax>,

    /// Mean fitness of the frames with a fitness at or below 0.95
    pub mean_imperfect_fitness: Option<f64>,

    pub inlier_rmse: Option<MinMeanMax>,

    pub error_x_m: Option<MinMeanMax>,
    pub error_y_m: Option<MinMeanMax>,
    pub error_z_m: Option<MinMeanMax>,
    pub error_2d_m: Option<MinMeanMax>,
    pub error_3d_m: Option<MinMeanMax>,
    pub along_m: Option<MinMeanMax>,
    pub across_m: Option<MinMeanMax>,

    pub final_error_2d_m: Option<f64>,
    pub final_error_3d_m: Option<f64>,
    pub final_along_m: Option<f64>,
    pub final_across_m: Option<f64>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl MinMeanMax {
    pub fn from_values<I: IntoIterator<Item = f64>>(values: I) -> Option<Self> {
        let mut n = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;

        for v in values {
            n += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }

        if n == 0 {
            None
        } else {
            Some(Self {
                min,
                mean: sum / n as f64,
                max,
            })
        }
    }
}

impl SummaryStats {
    pub fn from_records(records: &[FrameRecord]) -> Self {
        let stat = |f: fn(&FrameRecord) -> f64| MinMeanMax::from_values(records.iter().map(f));

        let imperfect: Vec<f64> = records
            .iter()
            .map(|r| r.fitness)
            .filter(|f| *f <= IMPERFECT_FITNESS)
            .collect();

        let last = records.last();

        Self {
            num_frames: records.len(),
            total_distance_m: records.iter().map(|r| r.movement_m).sum(),
            movement_m: stat(|r| r.movement_m),
            registration_time_s: stat(|r| r.registration_time_s),
            fitness: stat(|r| r.fitness),
            mean_imperfect_fitness: MinMeanMax::from_values(imperfect).map(|s| s.mean),
            inlier_rmse: stat(|r| r.inlier_rmse),
            error_x_m: stat(|r| r.errors.x_m),
            error_y_m: stat(|r| r.errors.y_m),
            error_z_m: stat(|r| r.errors.z_m),
            error_2d_m: stat(|r| r.errors.error_2d_m),
            error_3d_m: stat(|r| r.errors.error_3d_m),
            along_m: stat(|r| r.errors.along_m),
            across_m: stat(|r| r.errors.across_m),
            final_error_2d_m: last.map(|r| r.errors.error_2d_m),
            final_error_3d_m: last.map(|r| r.errors.error_3d_m),
            final_along_m: last.map(|r| r.errors.along_m),
            final_across_m: last.map(|r| r.errors.across_m),
        }
    }
}

impl std::fmt::Display for SummaryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn line(
            f: &mut std::fmt::Formatter<'_>,
            name: &str,
            s: &Option<MinMeanMax>,
        ) -> std::fmt::Result {
            match s {
                Some(s) => writeln!(
                    f,
                    "    {:<22} min {:>10.4}  mean {:>10.4}  max {:>10.4}",
                    name, s.min, s.mean, s.max
                ),
                None => writeln!(f, "    {:<22} -", name),
            }
        }

        writeln!(f, "Frames:                 {}", self.num_frames)?;
        writeln!(f, "Total distance:         {:.3} m", self.total_distance_m)?;
        line(f, "Movement (m)", &self.movement_m)?;
        line(f, "Registration time (s)", &self.registration_time_s)?;
        line(f, "Fitness", &self.fitness)?;
        match self.mean_imperfect_fitness {
            Some(m) => writeln!(f, "    {:<22} mean {:>10.4}", "Imperfect fitness", m)?,
            None => writeln!(f, "    {:<22} -", "Imperfect fitness")?,
        }
        line(f, "Inlier RMSE (m)", &self.inlier_rmse)?;
        line(f, "Error x (m)", &self.error_x_m)?;
        line(f, "Error y (m)", &self.error_y_m)?;
        line(f, "Error z (m)", &self.error_z_m)?;
        line(f, "Error 2D (m)", &self.error_2d_m)?;
        line(f, "Error 3D (m)", &self.error_3d_m)?;
        line(f, "Along heading (m)", &self.along_m)?;
        line(f, "Across heading (m)", &self.across_m)?;

        if let (Some(e2), Some(e3)) = (self.final_error_2d_m, self.final_error_3d_m) {
            writeln!(f, "Final error 2D/3D:      {:.3} / {:.3} m", e2, e3)?;
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
