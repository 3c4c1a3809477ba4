use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{Days, NaiveDate};
use shared::{LOG_FILE_PREFIX, LOG_FILE_SUFFIX};
use thiserror::Error;
use tracing::{info, warn};

/// Create the log directory if it does not exist.
pub fn ensure_log_directory(log_dir: &Path) -> io::Result<()> {
    fs::create_dir_all(log_dir)
}

/// The outcome of pruning the log directory.
#[derive(Debug, Default)]
pub struct PruneReport {
    /// The log files that were removed.
    pub removed: Vec<PathBuf>,

    /// The files that were skipped.
    pub errors: Vec<(PathBuf, LogRetentionError)>,
}

/// Remove every log file dated strictly before `today - horizon_days`.
///
/// Failures on a single file are recorded and the remaining files are still checked.
pub fn prune_old_logs(log_dir: &Path, today: NaiveDate, horizon_days: u64) -> PruneReport {
    let mut report = PruneReport::default();

    let Some(cutoff) = today.checked_sub_days(Days::new(horizon_days)) else {
        warn!("Retention of {horizon_days} days reaches before the calendar, keeping all logs");
        return report;
    };

    let directory = match fs::read_dir(log_dir) {
        Ok(directory) => directory,
        Err(error) => {
            warn!("Could not read log directory {log_dir:?}: {error}");
            report
                .errors
                .push((log_dir.to_path_buf(), LogRetentionError::ReadDirectory(error)));
            return report;
        }
    };

    for entry in directory {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!("Could not read log directory entry: {error}");
                report
                    .errors
                    .push((log_dir.to_path_buf(), LogRetentionError::ReadEntry(error)));
                continue;
            }
        };
        let path = entry.path();

        let file_name = entry.file_name();
        let Some(date) = file_name.to_str().and_then(dated_part) else {
            continue;
        };

        let date = match NaiveDate::parse_from_str(date, "%Y-%m-%d") {
            Ok(date) => date,
            Err(error) => {
                warn!("Could not parse the date of log file {path:?}: {error}");
                report
                    .errors
                    .push((path, LogRetentionError::ParseDate(error)));
                continue;
            }
        };

        if date >= cutoff {
            continue;
        }

        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Removed old log file {path:?}");
                report.removed.push(path);
            }
            Err(error) => {
                warn!("Could not remove old log file {path:?}: {error}");
                report.errors.push((path, LogRetentionError::Remove(error)));
            }
        }
    }

    report
}

/// The date part of `<prefix>.<date>.<suffix>`.
fn dated_part(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_prefix('.')?
        .strip_suffix(LOG_FILE_SUFFIX)?
        .strip_suffix('.')
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum LogRetentionError {
    #[error("Failed to read the log directory: {0}")]
    ReadDirectory(#[source] io::Error),

    #[error("Failed to read a directory entry: {0}")]
    ReadEntry(#[source] io::Error),

    #[error("Failed to parse the file date: {0}")]
    ParseDate(#[source] chrono::ParseError),

    #[error("Failed to remove the file: {0}")]
    Remove(#[source] io::Error),
}
