//! # mongo-migrate
//! Copy every database from a remote MongoDB host, through an SSH tunnel, into a local instance.
//!

mod backup_set;
mod config;
mod context;
mod interrupt;
mod lock;
mod log_retention;
mod migration;
pub mod runner;
pub mod tools;
pub mod tunnel;

pub use backup_set::{ADMIN_DATABASE, BackupSet, StagingError};
pub use config::{
    BackupConfig, Config, ConfigError, LoadConfigError, LoggingConfig, MongoConfig, SshConfig,
};
pub use context::{Context, Stage};
pub use interrupt::Interrupt;
pub use lock::{LockError, RunLock};
pub use log_retention::{LogRetentionError, PruneReport, ensure_log_directory, prune_old_logs};
pub use migration::{Migration, MigrationError, MigrationReport};
