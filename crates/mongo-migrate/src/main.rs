//! # mongo-migrate
//! Copy every database from a remote MongoDB host into a local instance.
//!

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::{env, fs, path::PathBuf, process::ExitCode};

use mimalloc::MiMalloc;
use mongo_migrate::{
    Config, Interrupt, Migration, RunLock, ensure_log_directory, prune_old_logs,
    runner::{ConsoleSink, LogSink, ProcessRunner},
    tunnel::{ProcTable, SshTunnel},
};
use shared::{Failure, current_log_date, init_logger};
use tracing::{error, warn};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();

    // Initialize config if args include 'init'.
    if args.iter().any(|arg| arg.eq("init")) {
        let config = Config::default();
        let contents =
            toml::to_string_pretty(&config).or_log_and_panic("Could not serialize config file");
        fs::write("config.toml", contents).or_log_and_panic("Could not create config file");
        return ExitCode::SUCCESS;
    }

    // Load config, the logger needs its log directory so failures go to stderr.
    let config_path = args
        .first()
        .map_or_else(|| PathBuf::from("./config.toml"), PathBuf::from);
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("[ERROR] Could not load config {config_path:?}: {error}");
            eprintln!("Run `mongo-migrate init` to create a default config.toml and edit it.");
            return ExitCode::FAILURE;
        }
    };

    // Setup logging
    if let Err(error) = ensure_log_directory(&config.logging.log_dir) {
        eprintln!(
            "[ERROR] Could not create log directory {:?}: {error}",
            config.logging.log_dir
        );
        return ExitCode::FAILURE;
    }
    let _logger = match init_logger(&config.logging.log_dir) {
        Ok(guard) => guard,
        Err(error) => {
            eprintln!("[ERROR] Could not initialize logger: {error}");
            return ExitCode::FAILURE;
        }
    };

    // Log files are named by UTC date.
    let pruned = prune_old_logs(
        &config.logging.log_dir,
        current_log_date(),
        config.logging.retention_days,
    );
    if !pruned.errors.is_empty() {
        warn!("{} log files could not be pruned", pruned.errors.len());
    }

    let interrupt = Interrupt::from_signals().unwrap_or_else(|error| {
        warn!("Could not install signal handlers: {error}");
        Interrupt::default()
    });

    let _lock = match RunLock::acquire(&RunLock::path_for(&config.backup.dump_path)) {
        Ok(lock) => lock,
        Err(error) => {
            error!("Could not start: {error}");
            return ExitCode::FAILURE;
        }
    };

    let tunnel = SshTunnel::new(&config, ProcTable::default());
    let runner = ProcessRunner::new(config.backup.captured_output_lines, interrupt.clone())
        .with_sink(ConsoleSink)
        .with_sink(LogSink);

    let mut migration = Migration::new(&config, tunnel, runner, interrupt);
    match migration.run() {
        Ok(_) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
