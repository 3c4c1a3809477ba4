use core::num::TryFromIntError;
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use nix::{
    errno::Errno,
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use thiserror::Error;

/// Finds and stops processes.
pub trait ProcessFinder {
    /// The processes running `program` with an argument containing `needle`.
    fn find(&self, program: &str, needle: &str) -> io::Result<Vec<u32>>;

    /// Ask a process to stop. A process that no longer exists is not an error.
    fn terminate(&self, pid: u32) -> Result<(), TerminateError>;
}

/// The OS process table, read from `/proc`.
#[derive(Debug, Clone)]
pub struct ProcTable {
    root: PathBuf,
}

impl ProcTable {
    /// A process table read from another directory laid out like `/proc`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The arguments of a process, `None` if it is gone or unreadable.
    fn arguments(&self, pid: u32) -> Option<Vec<String>> {
        let contents = fs::read(self.root.join(pid.to_string()).join("cmdline")).ok()?;

        let arguments: Vec<String> = contents
            .split(|byte| *byte == b'\0')
            .filter(|argument| !argument.is_empty())
            .map(|argument| String::from_utf8_lossy(argument).into_owned())
            .collect();

        Some(arguments)
    }
}

impl Default for ProcTable {
    fn default() -> Self {
        Self::with_root("/proc")
    }
}

impl ProcessFinder for ProcTable {
    fn find(&self, program: &str, needle: &str) -> io::Result<Vec<u32>> {
        let own_pid = std::process::id();
        let program_name = Path::new(program).file_name();

        let mut pids: Vec<u32> = fs::read_dir(&self.root)?
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let pid: u32 = entry.file_name().to_str()?.parse().ok()?;
                if pid == own_pid {
                    return None;
                }

                let arguments = self.arguments(pid)?;
                let (executable, rest) = arguments.split_first()?;

                let is_program =
                    program_name.is_some() && Path::new(executable).file_name() == program_name;
                let mentions_needle = rest.iter().any(|argument| argument.contains(needle));

                (is_program && mentions_needle).then_some(pid)
            })
            .collect();

        pids.sort_unstable();

        Ok(pids)
    }

    fn terminate(&self, pid: u32) -> Result<(), TerminateError> {
        let pid = Pid::from_raw(i32::try_from(pid)?);

        match kill(pid, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(error) => Err(TerminateError::Signal(error)),
        }
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum TerminateError {
    #[error("Process id does not fit a pid_t: {0}")]
    InvalidPid(#[from] TryFromIntError),

    #[error("Failed to signal the process: {0}")]
    Signal(#[source] Errno),
}
