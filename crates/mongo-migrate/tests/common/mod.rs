//! # common
//!

#![allow(dead_code)]

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use mongo_migrate::{
    Config, Interrupt,
    runner::{CommandLine, CommandResult, CommandStatus, Execute},
    tunnel::{EstablishError, TunnelControl, TunnelHandle},
};

/// A fresh, empty directory for one test.
pub fn test_directory(name: &str) -> PathBuf {
    let directory = std::env::temp_dir().join(format!(
        "mongo-migrate-test-{name}-{}",
        std::process::id()
    ));
    clear_directory(&directory);
    fs::create_dir_all(&directory).unwrap();
    directory
}

pub fn clear_directory(directory: &Path) {
    if directory.exists() {
        fs::remove_dir_all(directory).unwrap();
    }
}

/// A config staging its dump and logs under `directory`.
pub fn test_config(directory: &Path) -> Config {
    let mut config = Config::default();
    config.ssh.user = "backup".into();
    config.ssh.host = "mongo.internal".into();
    config.backup.dump_path = directory.join("dump");
    config.logging.log_dir = directory.join("logs");
    config
}

/// Something that happened to a [`FakeTunnel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelEvent {
    Check,
    Establish,
    Sweep,
    Teardown(u32),
}

/// A tunnel that records what it was asked to do.
#[derive(Clone, Default)]
pub struct FakeTunnel {
    pub events: Arc<Mutex<Vec<TunnelEvent>>>,
    pub unreachable: bool,
    pub establish_fails: bool,
}

impl FakeTunnel {
    pub fn events(&self) -> Vec<TunnelEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &TunnelEvent) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    pub fn teardowns(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, TunnelEvent::Teardown(_)))
            .count()
    }
}

pub const TUNNEL_PID: u32 = 4242;

impl TunnelControl for FakeTunnel {
    fn check_connectivity(&mut self) -> bool {
        self.events.lock().unwrap().push(TunnelEvent::Check);
        !self.unreachable
    }

    fn establish(&mut self) -> Result<TunnelHandle, EstablishError> {
        self.events.lock().unwrap().push(TunnelEvent::Establish);
        if self.establish_fails {
            return Err(EstablishError::Exited(Some(255)));
        }

        Ok(TunnelHandle {
            pid: TUNNEL_PID,
            local_port: 27018,
            host: "mongo.internal".into(),
            remote_port: 27017,
        })
    }

    fn teardown(&mut self, handle: Option<TunnelHandle>) {
        let event = match handle {
            Some(handle) => TunnelEvent::Teardown(handle.pid),
            None => TunnelEvent::Sweep,
        };
        self.events.lock().unwrap().push(event);
    }
}

/// A runner that pretends to be mongodump and mongorestore.
///
/// The dump creates one directory per entry of `databases` under its `--out` argument.
#[derive(Clone, Default)]
pub struct FakeRunner {
    pub commands: Arc<Mutex<Vec<CommandLine>>>,
    pub databases: Vec<String>,
    /// The first command whose line contains the needle ends with the status.
    pub fail_on: Option<(String, CommandStatus)>,
    /// The first command whose line contains the needle raises the interrupt.
    pub interrupt_on: Option<(String, Interrupt)>,
    /// The first command whose line contains the needle panics.
    pub panic_on: Option<String>,
    /// The staging directory as seen when the dump ran.
    pub staged_before_dump: Arc<Mutex<Option<Vec<String>>>>,
}

impl FakeRunner {
    pub fn with_databases(databases: &[&str]) -> Self {
        Self {
            databases: databases.iter().map(|name| name.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn commands(&self) -> Vec<CommandLine> {
        self.commands.lock().unwrap().clone()
    }

    /// The `--db` argument of every restore run, in order.
    pub fn restored(&self) -> Vec<String> {
        self.commands()
            .iter()
            .filter(|command| command.program == "mongorestore")
            .filter_map(|command| {
                let position = command.args.iter().position(|arg| arg == "--db")?;
                command.args.get(position + 1).cloned()
            })
            .collect()
    }

    fn dump(&self, command: &CommandLine) {
        let position = command.args.iter().position(|arg| arg == "--out").unwrap();
        let out = PathBuf::from(&command.args[position + 1]);

        let staged = fs::read_dir(&out).ok().map(|directory| {
            let mut names: Vec<String> = directory
                .map(|entry| entry.unwrap().file_name().into_string().unwrap())
                .collect();
            names.sort();
            names
        });
        *self.staged_before_dump.lock().unwrap() = staged;

        for database in &self.databases {
            let path = out.join(database);
            fs::create_dir_all(&path).unwrap();
            fs::write(path.join("collection.bson"), b"bson").unwrap();
        }
    }
}

impl Execute for FakeRunner {
    fn run(&mut self, command: &CommandLine, _description: &str) -> CommandResult {
        self.commands.lock().unwrap().push(command.clone());
        let line = command.to_string();

        if let Some(needle) = &self.panic_on {
            if line.contains(needle.as_str()) {
                panic!("runner panicked on '{line}'");
            }
        }

        if let Some((needle, interrupt)) = &self.interrupt_on {
            if line.contains(needle.as_str()) {
                interrupt.trigger();
                return CommandResult {
                    status: CommandStatus::Interrupted,
                    lines: Vec::new(),
                };
            }
        }

        if let Some((needle, status)) = &self.fail_on {
            if line.contains(needle.as_str()) {
                return CommandResult {
                    status: status.clone(),
                    lines: vec!["error: something went wrong".into()],
                };
            }
        }

        if command.program == "mongodump" {
            self.dump(command);
        }

        CommandResult {
            status: CommandStatus::Success,
            lines: Vec::new(),
        }
    }
}
