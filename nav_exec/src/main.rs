//! # Navigation Executable
//!
//! Runs a navigation session over a directory of recorded LiDAR frames, estimating the vehicle's
//! trajectory and building a point cloud model of its surroundings.
//!
//! Everything produced by the run lands in a new session directory:
//!
//! - `nav_exec.log`: the log
//! - `arch/trajectory.csv`: one row per registered frame
//! - `checkpoint.json`: results so far, rewritten during the run
//! - `results.json`: the final results, written whether the run finished or not
//! - `trajectory_global.json`: the estimated trajectory in global coordinates
//! - `model.csv`: the model in local coordinates, with the offset in `model.csv.meta.json`
//! - `frame_pairs/`: poorly registered frames, if enabled

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use color_eyre::{eyre::WrapErr, Result};
use log::{info, warn};
use structopt::StructOpt;

use nav_if::csv_source::{save_offset, write_cloud, CsvFrameSource, CsvGroundTruth, ReferenceCloud};
use nav_lib::{
    nav::{FatalError, NavigationSession},
    params::{NavExecParams, NavMode},
};
use util::{
    archive::Archiver,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "nav_exec", about = "LiDAR pose estimation and map maintenance")]
struct Opt {
    /// Directory holding one CSV point cloud per frame
    #[structopt(parse(from_os_str))]
    frames: PathBuf,

    /// Ground truth CSV, one pose per frame
    #[structopt(parse(from_os_str))]
    ground_truth: PathBuf,

    /// Reference map CSV, required in absolute mode
    #[structopt(short, long, parse(from_os_str))]
    reference: Option<PathBuf>,

    /// Parameter file
    #[structopt(short, long, default_value = "params/nav_exec.toml", parse(from_os_str))]
    params: PathBuf,

    /// Directory in which to create the session
    #[structopt(long, default_value = "sessions", parse(from_os_str))]
    sessions: PathBuf,

    /// Only use every nth frame
    #[structopt(long, default_value = "1")]
    stride: usize,

    /// Stop after this many frames, overriding the parameter file
    #[structopt(long)]
    frame_limit: Option<usize>,

    /// Log at debug level
    #[structopt(short, long)]
    verbose: bool,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    let opt = Opt::from_args();

    // ---- EARLY INITIALISATION ----

    let session = Session::new("nav_exec", &opt.sessions).wrap_err("Failed to create the session")?;

    let level = if opt.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    logger_init(level, &session).wrap_err("Failed to initialise logging")?;

    info!("LiDAR Navigation\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let mut params: NavExecParams =
        util::params::load(&opt.params).wrap_err("Could not load nav_exec params")?;

    if let Some(limit) = opt.frame_limit {
        params.frame_limit = limit;
    }

    if params.mode == NavMode::Absolute && opt.reference.is_none() {
        warn!("No reference map given, absolute navigation will fail to start");
    }

    // ---- COLLABORATORS ----

    let ground_truth = CsvGroundTruth::open(&opt.ground_truth)
        .wrap_err_with(|| format!("Could not load ground truth from {:?}", opt.ground_truth))?;

    let mut frames = CsvFrameSource::open(&opt.frames)
        .wrap_err_with(|| format!("Could not open frames in {:?}", opt.frames))?
        .with_stride(opt.stride);
    info!("Found {} frames in {:?}", frames.num_frames(), opt.frames);

    let interrupt = Arc::new(AtomicBool::new(false));
    {
        let flag = interrupt.clone();
        ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
            .wrap_err("Could not set the interrupt handler")?;
    }

    let archiver = Archiver::from_path(&session, "trajectory.csv")
        .wrap_err("Could not create the trajectory archive")?;

    let mut nav = NavigationSession::new(params)
        .with_session(session.clone())
        .with_archiver(archiver)
        .with_interrupt(interrupt);

    if let Some(path) = &opt.reference {
        let reference = ReferenceCloud::load(path)
            .wrap_err_with(|| format!("Could not load the reference map from {:?}", path))?;
        info!("Loaded reference map of {} points", reference.cloud.len());

        nav = nav.with_reference(reference.cloud, reference.offset);
    }

    // ---- RUN ----

    let output = nav.run(&mut frames, &ground_truth);

    // ---- OUTPUTS ----

    let model_path = session.session_root.join("model.csv");
    write_cloud(&model_path, &output.model).wrap_err("Could not write the model")?;
    save_offset(&model_path, &output.results.offset).wrap_err("Could not write the model offset")?;
    info!(
        "Wrote model of {} points to {:?}",
        output.model.len(),
        model_path
    );

    session.save(
        "trajectory_global.json",
        output.results.estimated_trajectory_global(),
    );

    session.exit();

    match output.error {
        None => Ok(()),
        Some(FatalError::Interrupted(frame)) => {
            info!("Stopped by the operator after frame {:?}", frame);
            Ok(())
        }
        Some(e) => Err(e).wrap_err("Navigation session aborted"),
    }
}
