//! The migration state machine.
//!

use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    ADMIN_DATABASE, BackupSet, Config, Context, Interrupt, Stage, StagingError,
    runner::{CommandStatus, Execute},
    tools::{dump_command, restore_command},
    tunnel::{EstablishError, TunnelControl, TunnelGuard},
};

const BANNER: &str = "============================================================";

/// The outcome of a successful migration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// The databases restored, in order.
    pub restored: Vec<String>,
}

/// One migration run: dump the remote databases through a tunnel and restore them locally.
pub struct Migration<'a, T: TunnelControl, R: Execute> {
    config: &'a Config,
    tunnel: T,
    runner: R,
    interrupt: Interrupt,
    context: Context,
}

impl<'a, T: TunnelControl, R: Execute> Migration<'a, T, R> {
    /// Create a run from its parts.
    pub fn new(config: &'a Config, tunnel: T, runner: R, interrupt: Interrupt) -> Self {
        Self {
            config,
            tunnel,
            runner,
            interrupt,
            context: Context::new(&config.ssh.host),
        }
    }

    /// The run's context, including every stage entered.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Run every stage.
    ///
    /// Once the tunnel is established it is torn down before this returns, whatever the
    /// outcome.
    pub fn run(&mut self) -> Result<MigrationReport, MigrationError> {
        info!("{BANNER}");
        info!("STARTING MONGODB BACKUP AND RESTORE");
        info!(
            "Source: {}:{}",
            self.config.ssh.principal(),
            self.config.mongodb.remote_port
        );
        match self.config.mongodb.local_port {
            Some(port) => info!("Target: localhost:{port}"),
            None => info!("Target: {}", self.config.mongodb.local_restore_uri),
        }
        info!("{BANNER}");

        let result = self.run_stages();
        self.context.database = None;

        match &result {
            Ok(report) => {
                self.context.enter(Stage::Done);
                info!(
                    "{}ALL BACKUP AND RESTORE STEPS SUCCEEDED ({} databases restored)",
                    self.context,
                    report.restored.len()
                );
            }
            Err(error) => {
                self.context.enter(Stage::Failed);
                error!("{}MIGRATION FAILED: {error}", self.context);
            }
        }

        info!("{BANNER}");
        info!("PROCESS FINISHED");
        info!("{BANNER}");

        result
    }

    fn run_stages(&mut self) -> Result<MigrationReport, MigrationError> {
        let Self {
            config,
            tunnel,
            runner,
            interrupt,
            context,
        } = self;

        context.enter(Stage::PreflightSweep);
        info!("{context}Cleaning up existing SSH tunnels");
        tunnel.teardown(None);

        context.enter(Stage::ConnectivityCheck);
        if !tunnel.check_connectivity() {
            error!("{context}SSH connection failed, stopping");
            return Err(MigrationError::Connectivity);
        }
        check_interrupt(interrupt, context)?;

        context.enter(Stage::TunnelUp);
        let handle = tunnel
            .establish()
            .inspect_err(|e| error!("{context}SSH tunnel could not be opened: {e}"))?;
        let guard = TunnelGuard::new(tunnel, handle);

        let result = transfer(*config, runner, interrupt, context);

        context.enter(Stage::TunnelDown);
        info!("{context}Closing SSH tunnel");
        drop(guard);
        info!("{context}SSH tunnel closed");

        result
    }
}

/// Clean the staging directory, dump, then restore each database.
fn transfer<R: Execute>(
    config: &Config,
    runner: &mut R,
    interrupt: &Interrupt,
    context: &mut Context,
) -> Result<MigrationReport, MigrationError> {
    let dump_path = &config.backup.dump_path;

    // Stage clean
    {
        context.enter(Stage::StageClean);
        check_interrupt(interrupt, context)?;

        if BackupSet::clear(dump_path)? {
            info!("{context}Removed old backup {dump_path:?}");
        }
    }

    // Dump
    {
        context.enter(Stage::Dumping);
        check_interrupt(interrupt, context)?;

        let result = runner.run(&dump_command(config), "mongodump from remote");
        match result.status {
            CommandStatus::Success => {}
            CommandStatus::Interrupted => return Err(MigrationError::Interrupted(Stage::Dumping)),
            status => {
                error!("{context}mongodump failed, stopping");
                return Err(MigrationError::Dump(status));
            }
        }
    }

    // Restore
    context.enter(Stage::Restoring);
    check_interrupt(interrupt, context)?;

    let backup_set = BackupSet::discover(dump_path)?;
    if backup_set.databases.is_empty() {
        warn!("{context}No databases to restore besides {ADMIN_DATABASE}");
        return Ok(MigrationReport::default());
    }
    info!("{context}Databases to restore: {:?}", backup_set.databases);

    let mut report = MigrationReport::default();
    for database in &backup_set.databases {
        context.database = Some(database.clone());
        check_interrupt(interrupt, context)?;

        let command = restore_command(config, database, &backup_set.database_path(database));
        let result = runner.run(&command, &format!("Restore database: {database}"));

        match result.status {
            CommandStatus::Success => report.restored.push(database.clone()),
            CommandStatus::Interrupted => {
                return Err(MigrationError::Interrupted(Stage::Restoring));
            }
            status => {
                error!("{context}Failed to restore database, skipping the rest");
                return Err(MigrationError::Restore {
                    database: database.clone(),
                    status,
                });
            }
        }
    }
    context.database = None;

    Ok(report)
}

fn check_interrupt(interrupt: &Interrupt, context: &Context) -> Result<(), MigrationError> {
    if interrupt.is_triggered() {
        warn!("{context}Stopped by interrupt");
        return Err(MigrationError::Interrupted(context.stage));
    }

    Ok(())
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("The SSH connectivity check failed")]
    Connectivity,

    #[error("Failed to establish the SSH tunnel: {0}")]
    TunnelEstablishment(#[from] EstablishError),

    #[error("Failed to prepare the backup directory: {0}")]
    Staging(#[from] StagingError),

    #[error("mongodump failed: {0}")]
    Dump(CommandStatus),

    #[error("Failed to restore database '{database}': {status}")]
    Restore {
        database: String,
        status: CommandStatus,
    },

    #[error("Interrupted during {0}")]
    Interrupted(Stage),
}
