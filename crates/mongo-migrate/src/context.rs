use core::fmt::{self, Display};

/// A stage of the migration.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Stage {
    #[default]
    Idle,
    PreflightSweep,
    ConnectivityCheck,
    TunnelUp,
    StageClean,
    Dumping,
    Restoring,
    TunnelDown,
    Done,
    Failed,
}

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::PreflightSweep => "Preflight Sweep",
            Self::ConnectivityCheck => "Connectivity Check",
            Self::TunnelUp => "Tunnel Up",
            Self::StageClean => "Stage Clean",
            Self::Dumping => "Dump",
            Self::Restoring => "Restore",
            Self::TunnelDown => "Tunnel Down",
            Self::Done => "Done",
            Self::Failed => "Failed",
        };

        f.write_str(name)
    }
}

/// Holds the context for the current run. Used for prefixing logs.
#[derive(Default, Debug)]
pub struct Context {
    /// The remote host.
    pub host: String,
    /// The database being restored.
    pub database: Option<String>,
    /// The current stage.
    pub stage: Stage,
    /// Every stage entered, in order.
    pub trail: Vec<Stage>,
}

impl Context {
    /// Create a context for a run against `host`.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Move to the next stage.
    pub fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        self.trail.push(stage);
    }
}

impl Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.host.is_empty() {
            write!(f, "[{}] ", self.host)?;
        }

        write!(f, "[{}] ", self.stage)?;

        if let Some(database) = &self.database {
            write!(f, "[{database}] ")?;
        }

        Ok(())
    }
}
