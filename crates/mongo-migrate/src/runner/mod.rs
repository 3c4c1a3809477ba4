//! Running external commands.
//!

use core::{fmt, time::Duration};
use std::{
    collections::VecDeque,
    io::{self, BufRead, BufReader, Read},
    process::{Child, Command, ExitStatus, Stdio},
    sync::mpsc::{self, RecvTimeoutError, Sender},
    thread::{self, JoinHandle},
    time::Instant,
};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::Interrupt;

mod sink;

pub use sink::{ConsoleSink, LogSink, MemorySink, OutputSink};

/// How often a blocked runner checks the interrupt and the child.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// The program to run.
    pub program: String,

    /// The arguments passed to the program.
    pub args: Vec<String>,
}

impl CommandLine {
    /// A command line with no arguments.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The `std` command for this command line.
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// How a command ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    /// Exited with status 0.
    Success,

    /// Exited with a non-zero status, `None` if it was killed by a signal.
    Failed(Option<i32>),

    /// The command could not be started.
    SpawnFailed(String),

    /// The run was interrupted and the command was stopped.
    Interrupted,
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed(Some(code)) => write!(f, "exit code {code}"),
            Self::Failed(None) => write!(f, "terminated by a signal"),
            Self::SpawnFailed(error) => write!(f, "could not start: {error}"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// The result of running a command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// How the command ended.
    pub status: CommandStatus,

    /// The most recent output lines, stdout and stderr merged in arrival order.
    pub lines: Vec<String>,
}

impl CommandResult {
    /// If the command exited with status 0.
    pub fn success(&self) -> bool {
        self.status == CommandStatus::Success
    }
}

/// Runs commands to completion.
pub trait Execute {
    /// Run `command`, blocking until it ends.
    fn run(&mut self, command: &CommandLine, description: &str) -> CommandResult;
}

/// Runs commands as child processes and streams their output to sinks.
pub struct ProcessRunner {
    sinks: Vec<Box<dyn OutputSink>>,
    capture_limit: usize,
    interrupt: Interrupt,
}

impl ProcessRunner {
    /// A runner with no sinks, keeping the last `capture_limit` lines of each command.
    pub fn new(capture_limit: usize, interrupt: Interrupt) -> Self {
        Self {
            sinks: Vec::new(),
            capture_limit,
            interrupt,
        }
    }

    /// Add a sink that receives every output line.
    pub fn with_sink(mut self, sink: impl OutputSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    fn emit(&mut self, description: &str, line: String, captured: &mut VecDeque<String>) {
        for sink in &mut self.sinks {
            sink.write_line(description, &line);
        }

        if self.capture_limit == 0 {
            return;
        }
        if captured.len() == self.capture_limit {
            captured.pop_front();
        }
        captured.push_back(line);
    }
}

impl Execute for ProcessRunner {
    fn run(&mut self, command: &CommandLine, description: &str) -> CommandResult {
        info!("Starting: {description}");

        let spawned = command
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(error) => {
                error!("Failed: {description} (could not start: {error})");
                error!("Command: {command}");
                return CommandResult {
                    status: CommandStatus::SpawnFailed(error.to_string()),
                    lines: Vec::new(),
                };
            }
        };

        // Merge stdout and stderr into one stream of lines.
        let (sender, receiver) = mpsc::channel();
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, sender.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, sender.clone());
        }
        drop(sender);

        let mut captured = VecDeque::new();
        let mut killed = false;

        loop {
            match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(line) => self.emit(description, line, &mut captured),
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    // Descendants of a killed child may still hold the pipes open.
                    if killed && matches!(child.try_wait(), Ok(Some(_))) {
                        break;
                    }
                }
            }

            if !killed && self.interrupt.is_triggered() {
                warn!("Interrupted, stopping: {description}");
                if let Err(error) = child.kill() {
                    warn!("Could not kill '{command}': {error}");
                }
                killed = true;
            }
        }

        let lines: Vec<String> = captured.into();

        let exit_status = match child.wait() {
            Ok(exit_status) => exit_status,
            Err(error) => {
                error!("Failed: {description} (could not wait for the process: {error})");
                error!("Command: {command}");
                return CommandResult {
                    status: CommandStatus::Failed(None),
                    lines,
                };
            }
        };

        let status = if exit_status.success() {
            CommandStatus::Success
        } else if killed || self.interrupt.is_triggered() {
            CommandStatus::Interrupted
        } else {
            CommandStatus::Failed(exit_status.code())
        };

        match &status {
            CommandStatus::Success => info!("Succeeded: {description}"),
            status => {
                error!("Failed: {description} ({status})");
                error!("Command: {command}");
            }
        }

        CommandResult { status, lines }
    }
}

/// Forward each line of `reader` to `sender` until EOF.
fn spawn_line_reader<R: Read + Send + 'static>(reader: R, sender: Sender<String>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buffer = Vec::new();

        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer) {
                Ok(0) => break,
                Ok(_) => {}
                Err(error) => {
                    warn!("Could not read command output: {error}");
                    break;
                }
            }

            let line = String::from_utf8_lossy(&buffer)
                .trim_end_matches(['\r', '\n'])
                .to_string();

            if sender.send(line).is_err() {
                break;
            }
        }
    });
}

/// The output of a command that exited with status 0.
#[derive(Debug, Clone)]
pub struct ProbeOutput {
    /// Everything written to stdout.
    pub stdout: String,
}

/// Run a short command, killing it if it runs longer than `timeout`.
///
/// Output is collected rather than streamed.
pub fn run_with_timeout(
    command: &CommandLine,
    timeout: Duration,
) -> Result<ProbeOutput, ProbeError> {
    let mut child = command
        .to_command()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(ProbeError::Spawn)?;

    let stdout = child.stdout.take().map(spawn_collector);
    let stderr = child.stderr.take().map(spawn_collector);

    let exit_status = wait_until(&mut child, Instant::now() + timeout)?;

    let Some(exit_status) = exit_status else {
        if let Err(error) = child.kill() {
            warn!("Could not kill '{command}': {error}");
        }
        let _ = child.wait();
        return Err(ProbeError::TimedOut(timeout));
    };

    let stdout = stdout.map(join_collector).unwrap_or_default();
    let stderr = stderr.map(join_collector).unwrap_or_default();

    if !exit_status.success() {
        return Err(ProbeError::Exited {
            code: exit_status.code(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(ProbeOutput { stdout })
}

/// Poll `child` until it exits or `deadline` passes.
fn wait_until(child: &mut Child, deadline: Instant) -> Result<Option<ExitStatus>, ProbeError> {
    loop {
        if let Some(exit_status) = child.try_wait().map_err(ProbeError::Wait)? {
            return Ok(Some(exit_status));
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }

        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

fn spawn_collector<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut bytes = Vec::new();
        if let Err(error) = reader.read_to_end(&mut bytes) {
            warn!("Could not read command output: {error}");
        }
        String::from_utf8_lossy(&bytes).into_owned()
    })
}

fn join_collector(handle: JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Failed to start the command: {0}")]
    Spawn(#[source] io::Error),

    #[error("Failed to wait for the command: {0}")]
    Wait(#[source] io::Error),

    #[error("Timed out after {0:?}")]
    TimedOut(Duration),

    #[error("Exited with code {code:?}: {stderr}")]
    Exited { code: Option<i32>, stderr: String },
}
