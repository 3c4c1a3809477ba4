//! # Shared
//! Process plumbing shared by the workspace binaries.
//!

#![warn(missing_docs)]

mod failure;
mod logger;

pub use failure::Failure;
pub use logger::{
    LOG_FILE_PREFIX, LOG_FILE_SUFFIX, LoggerError, OUTPUT_TARGET, build_logger, current_log_date,
    init_logger, log_appender, log_file_name,
};
