//! Status reporting for supervised processes.
//!
//! The supervisor hands every polled process to a [`Renderer`] as a
//! [`ProcessReport`]. Renderer failures are logged by the caller and never
//! stop a run.

pub mod console;
pub mod format;

use std::io;

use crate::source::Command;
use crate::subprocess::{ProcessHandle, ProcessStatus};
use crate::supervisor::RunSummary;

pub use console::ConsoleRenderer;

/// How much captured output a report carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// The last `n` rows.
    Tail(usize),
    /// Everything still buffered.
    Full,
}

/// Snapshot of one process, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    pub index: usize,
    pub command_line: String,
    pub status: ProcessStatus,
    pub output_mode: OutputMode,
    pub output: String,
    pub runtime: String,
    pub last_update: String,
}

impl ProcessReport {
    /// Build a report; failed processes always carry their full output.
    pub fn from_handle(handle: &ProcessHandle, mode: OutputMode) -> Self {
        let status = handle.status();
        let output_mode = if status == ProcessStatus::Error {
            OutputMode::Full
        } else {
            mode
        };
        let output = match output_mode {
            OutputMode::Tail(rows) => handle.output_tail(rows),
            OutputMode::Full => handle.output_all(),
        };
        Self {
            index: handle.index(),
            command_line: handle.command_line(),
            status,
            output_mode,
            output,
            runtime: handle.runtime_display(),
            last_update: handle.last_update(),
        }
    }
}

/// Sink for live status output.
pub trait Renderer {
    /// Called once before the first launch with the queued commands.
    fn overview(&mut self, commands: &[Command]) -> io::Result<()>;

    /// Called for every process polled in the current tick.
    fn report(&mut self, report: &ProcessReport) -> io::Result<()>;

    /// Called once per tick, after all reports.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Called once when the run is over.
    fn summary(&mut self, summary: &RunSummary) -> io::Result<()>;
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn finished(args: &[&str]) -> ProcessHandle {
        let mut handle = ProcessHandle::new(3, Command::new(args.iter().copied()).unwrap(), 100);
        handle.start().unwrap();
        while !handle.is_settled() {
            handle.update().unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle
    }

    #[tokio::test]
    async fn tail_mode_limits_rows() {
        let handle = finished(&["sh", "-c", "seq 1 8"]).await;
        let report = ProcessReport::from_handle(&handle, OutputMode::Tail(5));
        assert_eq!(report.index, 3);
        assert_eq!(report.command_line, "sh -c seq 1 8");
        assert_eq!(report.status, ProcessStatus::Done);
        assert_eq!(report.output, "4\n5\n6\n7\n8");
    }

    #[tokio::test]
    async fn errors_always_show_full_output() {
        let handle = finished(&["sh", "-c", "seq 1 8; exit 1"]).await;
        let report = ProcessReport::from_handle(&handle, OutputMode::Tail(2));
        assert_eq!(report.status, ProcessStatus::Error);
        assert_eq!(report.output_mode, OutputMode::Full);
        assert_eq!(report.output.lines().count(), 8);
    }
}
