//! Session logger
//!
//! Log records go to stdout with coloured level tags and to the session's log file as plain
//! text. Both lines carry the seconds elapsed since the session epoch. Records at debug level and
//! below also carry their target so per-module output can be told apart.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use colored::{ColoredString, Colorize};
use log::{info, Level, Record};
use thiserror::Error;

use crate::session::{self, Session};

pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Per-iteration registration output is only wanted when explicitly asked for.
const QUIET_TARGETS: &[&str] = &["nav_lib::reg::icp", "nav_lib::reg::neighbours"];

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("Expected a log level of at least `INFO`, found `{0}`")]
    LevelTooLow(LevelFilter),

    #[error("Could not open the log file: {0}")]
    LogFile(std::io::Error),

    #[error("Could not install the logger: {0}")]
    SetLogger(log::SetLoggerError),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
///
/// `min_level` must include `Info`, the session details are logged at that level. The ICP
/// internals are capped at `Debug` unless `min_level` is `Trace`.
///
/// Must only be called once per process.
pub fn logger_init(min_level: LevelFilter, session: &Session) -> Result<(), LoggerInitError> {
    if min_level < LevelFilter::Info {
        return Err(LoggerInitError::LevelTooLow(min_level));
    }

    let log_file = fern::log_file(&session.log_file_path).map_err(LoggerInitError::LogFile)?;

    let quiet_level = min_level.min(LevelFilter::Debug);
    let mut dispatch = fern::Dispatch::new().level(min_level);
    if min_level < LevelFilter::Trace {
        for target in QUIET_TARGETS {
            dispatch = dispatch.level_for(*target, quiet_level);
        }
    }

    let stdout = fern::Dispatch::new()
        .format(|out, message, record| out.finish(format_args!("{}", line(record, message, true))))
        .chain(std::io::stdout());

    let file = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("{}", line(record, message, false)))
        })
        .chain(log_file);

    dispatch
        .chain(stdout)
        .chain(file)
        .apply()
        .map_err(LoggerInitError::SetLogger)?;

    info!("Logging initialised");
    if let Some(epoch) = session::get_epoch() {
        info!("    Session epoch: {}", epoch);
    }
    info!("    Log level: {:?}", min_level);
    info!("    Log file path: {:?}", session.log_file_path);

    Ok(())
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn line(record: &Record, message: &std::fmt::Arguments, colour: bool) -> String {
    let tag = if colour {
        level_tag(record.level()).to_string()
    } else {
        level_str(record.level()).to_string()
    };

    if record.level() > Level::Info {
        format!(
            "[{:10.6} {}] {}: {}",
            session::get_elapsed_seconds(),
            tag,
            record.target(),
            message
        )
    } else {
        format!("[{:10.6} {}] {}", session::get_elapsed_seconds(), tag, message)
    }
}

fn level_str(level: Level) -> &'static str {
    match level {
        Level::Trace => "TRC",
        Level::Debug => "DBG",
        Level::Info => "INF",
        Level::Warn => "WRN",
        Level::Error => "ERR",
    }
}

fn level_tag(level: Level) -> ColoredString {
    let s = level_str(level);
    match level {
        Level::Trace => s.dimmed().italic(),
        Level::Debug => s.dimmed(),
        Level::Info => s.normal(),
        Level::Warn => s.yellow(),
        Level::Error => s.red().bold(),
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
