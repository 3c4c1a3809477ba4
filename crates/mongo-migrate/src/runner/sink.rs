use std::{
    io::{self, Write},
    sync::{Arc, Mutex, PoisonError},
};

use shared::OUTPUT_TARGET;
use tracing::info;

/// Receives each output line of a running command.
pub trait OutputSink {
    /// Consume one line of output from the command described by `description`.
    fn write_line(&mut self, description: &str, line: &str);
}

/// Echoes lines to stdout, indented under the surrounding log lines.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn write_line(&mut self, _description: &str, line: &str) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "    {line}");
    }
}

/// Appends lines to the log file.
#[derive(Debug, Default)]
pub struct LogSink;

impl OutputSink for LogSink {
    fn write_line(&mut self, description: &str, line: &str) {
        info!(target: OUTPUT_TARGET, "[{description}] OUTPUT: {line}");
    }
}

/// Keeps every line in memory, clones share the same lines.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<(String, String)>>>,
}

impl MemorySink {
    /// The `(description, line)` pairs received so far.
    pub fn lines(&self) -> Vec<(String, String)> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl OutputSink for MemorySink {
    fn write_line(&mut self, description: &str, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((description.to_string(), line.to_string()));
    }
}
