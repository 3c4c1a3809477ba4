//! Invocations of the dump and restore tools.
//!

use std::path::Path;

use crate::{Config, runner::CommandLine};

/// Dump every database reachable through the tunnel into the staging directory.
pub fn dump_command(config: &Config) -> CommandLine {
    CommandLine::new(&config.mongodb.dump_program)
        .arg("--uri")
        .arg(config.mongodb.tunnel_uri())
        .arg("--out")
        .arg(config.backup.dump_path.to_string_lossy())
}

/// Drop and restore one database from its staged directory.
pub fn restore_command(config: &Config, database: &str, source: &Path) -> CommandLine {
    CommandLine::new(&config.mongodb.restore_program)
        .args(["--drop", "--db", database])
        .arg(source.to_string_lossy())
        .arg("--uri")
        .arg(&config.mongodb.local_restore_uri)
}
