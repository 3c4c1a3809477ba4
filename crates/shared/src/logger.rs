use std::{io, path::Path};

use chrono::{NaiveDate, Utc};
use thiserror::Error;
use tracing::{
    Level, Subscriber,
    level_filters::LevelFilter,
    subscriber::{SetGlobalDefaultError, set_global_default},
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{InitError, RollingFileAppender, Rotation},
};
use tracing_subscriber::{Layer, filter::Targets, fmt::MakeWriter, layer::SubscriberExt, registry};

/// The prefix of every log file name.
pub const LOG_FILE_PREFIX: &str = "mongo-migrate";

/// The extension of every log file name.
pub const LOG_FILE_SUFFIX: &str = "log";

/// The target subprocess output is logged under.
///
/// Events with this target are only written to the log file, the console already receives the raw
/// lines.
pub const OUTPUT_TARGET: &str = "subprocess_output";

/// The name of the log file for a given `YYYY-MM-DD` date.
///
/// Matches the names the daily rolling appender creates.
pub fn log_file_name(date: &str) -> String {
    format!("{LOG_FILE_PREFIX}.{date}.{LOG_FILE_SUFFIX}")
}

/// The date of the log file being written now.
///
/// The daily appender rolls over at midnight UTC, so this is the UTC date, not the local one.
pub fn current_log_date() -> NaiveDate {
    Utc::now().date_naive()
}

/// The daily rolling appender writing into `directory`.
pub fn log_appender(directory: &Path) -> Result<RollingFileAppender, InitError> {
    RollingFileAppender::builder()
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .rotation(Rotation::DAILY)
        .build(directory)
}

/// Create and set the global loggers.
///
/// The log directory must already exist.
pub fn init_logger(directory: &Path) -> Result<WorkerGuard, LoggerError> {
    let (guard, subscriber) = build_logger(directory, io::stdout)?;

    // Set global subscriber
    set_global_default(subscriber)?;

    Ok(guard)
}

/// Build the loggers without installing them, writing console output to `console`.
///
/// The console layer writes on the calling thread, so its lines stay in order with anything else
/// written to the same console.
pub fn build_logger<W>(
    directory: &Path,
    console: W,
) -> Result<(WorkerGuard, impl Subscriber + Send + Sync + use<W>), LoggerError>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    // File layer
    let (file_guard, file_layer) = {
        let (writer, guard) = tracing_appender::non_blocking(log_appender(directory)?);

        let filter = Targets::new().with_default(Level::INFO);

        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(false)
            .with_filter(filter);

        (guard, layer)
    };

    // Std layer
    let std_layer = {
        let filter = Targets::new()
            .with_default(Level::INFO)
            .with_target(OUTPUT_TARGET, LevelFilter::OFF);

        tracing_subscriber::fmt::layer()
            .with_writer(console)
            .with_ansi(true)
            .with_target(false)
            .with_filter(filter)
    };

    // Create registry
    let subscriber = registry().with(file_layer).with(std_layer);

    Ok((file_guard, subscriber))
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("Failed to create rolling appender:\n{0}")]
    CreateRollingAppender(#[from] InitError),

    #[error("Failed to set the global subscriber:\n{0}")]
    SetGlobal(#[from] SetGlobalDefaultError),
}
