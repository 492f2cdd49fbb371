//! Handle to one supervised child process.
//!
//! A [`ProcessHandle`] owns the OS child, its captured output and its
//! timestamps. The part of its state that the signal listener touches lives
//! in a shared [`ProcessControl`], so a stop request can be delivered while
//! the supervisor loop is mid-iteration.

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command as ChildCommand};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, warn};

use crate::render::format::{format_duration, format_recency};
use crate::source::Command;

use super::output::OutputBuffer;
use super::status::{ProcessStatus, classify};

/// Errors from subprocess operations.
#[derive(Debug, thiserror::Error)]
pub enum SubprocessError {
    #[error("Failed to launch `{command}`: {source}")]
    LaunchFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Process `{command}` was already started")]
    AlreadyStarted { command: String },

    #[error("Failed to poll `{command}`: {source}")]
    Poll {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::Error,
    },

    #[error("Process id {pid} does not fit a platform pid")]
    InvalidPid { pid: u32 },
}

/// Termination state shared between a handle and the stop path.
///
/// Reaping the child and signalling it both happen under the same lock, so
/// a PID is never signalled after it was reaped.
#[derive(Debug, Default)]
pub struct ProcessControl {
    state: Mutex<ControlState>,
}

#[derive(Debug, Default)]
struct ControlState {
    pid: Option<u32>,
    reaped: bool,
    manual_terminated: bool,
    /// Signal requested before the child had a PID.
    pending_signal: Option<Signal>,
}

impl ProcessControl {
    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark the process manually terminated, then forward `signal` to it.
    ///
    /// Returns `false` when the child is already reaped (nothing was sent).
    /// A request arriving before launch is delivered right after the spawn.
    pub fn terminate(&self, signal: Signal) -> Result<bool, SubprocessError> {
        let mut state = self.lock();
        if state.reaped {
            return Ok(false);
        }
        state.manual_terminated = true;
        match state.pid {
            Some(pid) => {
                debug!(pid, %signal, "Forwarding signal to child");
                send_signal(pid, signal)?;
            }
            None => state.pending_signal = Some(signal),
        }
        Ok(true)
    }

    pub fn manual_terminated(&self) -> bool {
        self.lock().manual_terminated
    }
}

fn send_signal(pid: u32, signal: Signal) -> Result<(), SubprocessError> {
    let raw = i32::try_from(pid).map_err(|_| SubprocessError::InvalidPid { pid })?;
    kill(Pid::from_raw(raw), signal).map_err(|source| SubprocessError::Signal { pid, source })
}

/// One launched command and everything observed about it.
#[derive(Debug)]
pub struct ProcessHandle {
    index: usize,
    command: Command,
    child: Option<Child>,
    control: Arc<ProcessControl>,
    output: OutputBuffer,
    /// `None` once both output streams are closed (or were never opened).
    output_rx: Option<mpsc::UnboundedReceiver<String>>,
    exit: Option<ExitStatus>,
    launch_error: Option<String>,
    start_time: Option<Instant>,
    end_time: Option<Instant>,
    ended_at: Option<DateTime<Local>>,
    last_output_time: Option<Instant>,
}

impl ProcessHandle {
    /// Wrap `command`; nothing is spawned until [`start`](Self::start).
    pub fn new(index: usize, command: Command, max_output_rows: usize) -> Self {
        Self {
            index,
            command,
            child: None,
            control: Arc::new(ProcessControl::default()),
            output: OutputBuffer::new(max_output_rows),
            output_rx: None,
            exit: None,
            launch_error: None,
            start_time: None,
            end_time: None,
            ended_at: None,
            last_output_time: None,
        }
    }

    /// Spawn the child with piped output and record the start time.
    ///
    /// On failure the handle is left in a final `Error` state with the
    /// launch error as its only output row.
    pub fn start(&mut self) -> Result<(), SubprocessError> {
        if self.start_time.is_some() {
            return Err(SubprocessError::AlreadyStarted {
                command: self.command.to_string(),
            });
        }

        let mut cmd = ChildCommand::new(self.command.program());
        cmd.args(self.command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        self.start_time = Some(Instant::now());
        info!(index = self.index, command = %self.command, "Starting process");

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                {
                    // Nothing was signalled, so a stop requested before the
                    // spawn does not make the failure a manual termination.
                    let mut state = self.control.lock();
                    state.reaped = true;
                    state.manual_terminated = false;
                    state.pending_signal = None;
                }
                self.launch_error = Some(source.to_string());
                self.output.push(format!("failed to launch: {source}"));
                self.last_output_time = Some(Instant::now());
                self.mark_ended();
                return Err(SubprocessError::LaunchFailed {
                    command: self.command.to_string(),
                    source,
                });
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx.clone(), self.index, "stderr");
        }
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx, self.index, "stdout");
        }
        self.output_rx = Some(rx);

        let pid = child.id();
        self.child = Some(child);

        let mut state = self.control.lock();
        state.pid = pid;
        if let Some(signal) = state.pending_signal.take()
            && let Some(pid) = pid
        {
            debug!(pid, %signal, "Delivering signal requested before launch");
            if let Err(e) = send_signal(pid, signal) {
                warn!(index = self.index, error = %e, "Failed to deliver pending signal");
            }
        }
        Ok(())
    }

    /// Drain new output and refresh the exit state. Never blocks.
    pub fn update(&mut self) -> Result<(), SubprocessError> {
        self.drain_output();
        self.refresh_exit()?;
        if self.end_time.is_none() && !self.is_running() {
            self.mark_ended();
        }
        Ok(())
    }

    /// Reap the child if it has exited, without touching the output.
    ///
    /// The end time is recorded here, on the first poll that sees the exit.
    pub fn refresh_exit(&mut self) -> Result<(), SubprocessError> {
        if self.exit.is_some() {
            return Ok(());
        }
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };

        let mut state = self.control.lock();
        match child.try_wait() {
            Ok(Some(status)) => {
                state.reaped = true;
                drop(state);
                info!(
                    index = self.index,
                    command = %self.command,
                    code = ?status.code(),
                    "Process exited"
                );
                self.exit = Some(status);
                if self.end_time.is_none() {
                    self.mark_ended();
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(source) => Err(SubprocessError::Poll {
                command: self.command.to_string(),
                source,
            }),
        }
    }

    fn drain_output(&mut self) {
        let Some(rx) = self.output_rx.as_mut() else {
            return;
        };

        let mut closed = false;
        loop {
            match rx.try_recv() {
                Ok(chunk) => {
                    for line in chunk.lines() {
                        let row = line.trim();
                        if row.is_empty() {
                            continue;
                        }
                        self.output.push(row);
                        self.last_output_time = Some(Instant::now());
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }
        if closed {
            self.output_rx = None;
        }
    }

    fn mark_ended(&mut self) {
        self.end_time = Some(Instant::now());
        self.ended_at = Some(Local::now());
    }

    /// Mark manually terminated and forward `signal`; see [`ProcessControl::terminate`].
    pub fn terminate(&self, signal: Signal) -> Result<bool, SubprocessError> {
        self.control.terminate(signal)
    }

    /// Current status, derived from the last observed exit state.
    pub fn status(&self) -> ProcessStatus {
        classify(
            !self.is_running(),
            self.exit.is_some_and(|status| status.success()),
            self.control.manual_terminated(),
        )
    }

    pub const fn is_running(&self) -> bool {
        self.child.is_some() && self.exit.is_none()
    }

    /// Ended and with both output streams drained to EOF.
    pub const fn is_settled(&self) -> bool {
        self.end_time.is_some() && self.output_rx.is_none()
    }

    pub const fn index(&self) -> usize {
        self.index
    }

    pub const fn command(&self) -> &Command {
        &self.command
    }

    /// The command as shown to the user, tokens joined by spaces.
    pub fn command_line(&self) -> String {
        self.command.to_string()
    }

    pub fn control(&self) -> Arc<ProcessControl> {
        Arc::clone(&self.control)
    }

    pub fn manual_terminated(&self) -> bool {
        self.control.manual_terminated()
    }

    pub const fn exit_status(&self) -> Option<ExitStatus> {
        self.exit
    }

    pub fn launch_error(&self) -> Option<&str> {
        self.launch_error.as_deref()
    }

    pub const fn start_time(&self) -> Option<Instant> {
        self.start_time
    }

    pub const fn end_time(&self) -> Option<Instant> {
        self.end_time
    }

    pub const fn last_output_time(&self) -> Option<Instant> {
        self.last_output_time
    }

    pub const fn output(&self) -> &OutputBuffer {
        &self.output
    }

    pub fn output_tail(&self, rows: usize) -> String {
        self.output.tail(rows)
    }

    pub fn output_all(&self) -> String {
        self.output.all()
    }

    pub fn last_row(&self) -> Option<&str> {
        self.output.last()
    }

    /// Time between start and end, or start and now while running.
    pub fn runtime(&self) -> Duration {
        self.start_time.map_or(Duration::ZERO, |start| {
            self.end_time
                .unwrap_or_else(Instant::now)
                .saturating_duration_since(start)
        })
    }

    pub fn runtime_display(&self) -> String {
        format_duration(self.runtime())
    }

    /// Wall-clock end time once ended, otherwise how long ago output last
    /// arrived.
    pub fn last_update(&self) -> String {
        if let Some(ended_at) = self.ended_at {
            return ended_at.format("%H:%M:%S").to_string();
        }
        if !self.is_running() {
            return String::new();
        }
        self.last_output_time
            .map(|at| format_recency(at.elapsed()))
            .unwrap_or_default()
    }
}

/// Forward raw lines from `reader` until EOF. Invalid UTF-8 is replaced.
fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>, index: usize, stream: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if tx.send(String::from_utf8_lossy(&buf).into_owned()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(index, stream, error = %e, "Output read failed");
                    break;
                }
            }
        }
        debug!(index, stream, "Output reader finished");
    });
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn handle(args: &[&str]) -> ProcessHandle {
        ProcessHandle::new(0, Command::new(args.iter().copied()).unwrap(), 1000)
    }

    async fn wait_settled(handle: &mut ProcessHandle) {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                handle.update().unwrap();
                if handle.is_settled() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("process should settle");
    }

    #[tokio::test]
    async fn successful_exit_is_done() {
        let mut h = handle(&["true"]);
        h.start().unwrap();
        assert!(h.start_time().is_some());
        wait_settled(&mut h).await;
        assert_eq!(h.status(), ProcessStatus::Done);
        assert!(h.end_time().is_some());
        assert!(!h.manual_terminated());
    }

    #[tokio::test]
    async fn failing_exit_is_error() {
        let mut h = handle(&["false"]);
        h.start().unwrap();
        wait_settled(&mut h).await;
        assert_eq!(h.status(), ProcessStatus::Error);
        assert!(!h.manual_terminated());
    }

    #[tokio::test]
    async fn captures_non_blank_trimmed_lines() {
        let mut h = handle(&["sh", "-c", "printf 'hello\\n\\n   \\n  world  \\n'"]);
        h.start().unwrap();
        wait_settled(&mut h).await;
        let rows: Vec<_> = h.output().rows().collect();
        assert_eq!(rows, vec!["hello", "world"]);
        assert_eq!(h.last_row(), Some("world"));
        assert!(h.last_output_time().is_some());
    }

    #[tokio::test]
    async fn captures_stderr() {
        let mut h = handle(&["sh", "-c", "echo oops >&2; exit 3"]);
        h.start().unwrap();
        wait_settled(&mut h).await;
        assert_eq!(h.output_all(), "oops");
        assert_eq!(h.status(), ProcessStatus::Error);
        assert_eq!(h.exit_status().and_then(|s| s.code()), Some(3));
    }

    #[tokio::test]
    async fn output_is_capped_fifo() {
        let mut h = ProcessHandle::new(
            0,
            Command::new(["sh", "-c", "for i in $(seq 1 50); do echo line $i; done"]).unwrap(),
            10,
        );
        h.start().unwrap();
        wait_settled(&mut h).await;
        assert_eq!(h.output().len(), 10);
        let rows: Vec<_> = h.output().rows().collect();
        assert_eq!(rows.first(), Some(&"line 41"));
        assert_eq!(rows.last(), Some(&"line 50"));
    }

    #[tokio::test]
    async fn manual_termination_is_terminated() {
        let mut h = handle(&["sleep", "5"]);
        h.start().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.update().unwrap();
        assert_eq!(h.status(), ProcessStatus::Running);
        assert!(h.end_time().is_none());

        assert!(h.terminate(Signal::SIGTERM).unwrap());
        wait_settled(&mut h).await;

        assert_eq!(h.status(), ProcessStatus::Terminated);
        assert!(h.end_time().is_some());
        assert!(h.manual_terminated());
        assert!(h.runtime() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn terminate_after_exit_sends_nothing() {
        let mut h = handle(&["true"]);
        h.start().unwrap();
        wait_settled(&mut h).await;
        assert!(!h.terminate(Signal::SIGTERM).unwrap());
        assert!(!h.manual_terminated());
        assert_eq!(h.status(), ProcessStatus::Done);
    }

    #[tokio::test]
    async fn terminate_before_launch_is_delivered_on_start() {
        let mut h = handle(&["sleep", "5"]);
        assert!(h.terminate(Signal::SIGTERM).unwrap());
        h.start().unwrap();
        wait_settled(&mut h).await;
        assert_eq!(h.status(), ProcessStatus::Terminated);
    }

    #[tokio::test]
    async fn launch_failure_is_final_error() {
        let mut h = handle(&["/nonexistent/procrunner-test-binary"]);
        let err = h.start().unwrap_err();
        assert!(matches!(err, SubprocessError::LaunchFailed { .. }));
        assert_eq!(h.status(), ProcessStatus::Error);
        assert!(h.end_time().is_some());
        assert!(h.is_settled());
        assert!(h.launch_error().is_some());
        assert!(h.output_all().starts_with("failed to launch"));
        assert!(!h.terminate(Signal::SIGTERM).unwrap());
        assert!(!h.manual_terminated());
    }

    #[tokio::test]
    async fn stop_before_failed_launch_is_still_error() {
        let mut h = handle(&["/nonexistent/procrunner-test-binary"]);
        assert!(h.terminate(Signal::SIGTERM).unwrap());
        assert!(h.start().is_err());
        assert_eq!(h.status(), ProcessStatus::Error);
        assert!(!h.manual_terminated());
        assert!(!h.terminate(Signal::SIGTERM).unwrap());
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let mut h = handle(&["true"]);
        h.start().unwrap();
        assert!(matches!(
            h.start(),
            Err(SubprocessError::AlreadyStarted { .. })
        ));
        wait_settled(&mut h).await;
    }

    #[tokio::test]
    async fn update_on_settled_handle_is_idempotent() {
        let mut h = handle(&["sh", "-c", "echo done"]);
        h.start().unwrap();
        wait_settled(&mut h).await;

        let end = h.end_time();
        let rows = h.output_all();
        let status = h.status();
        for _ in 0..3 {
            h.update().unwrap();
        }
        assert_eq!(h.end_time(), end);
        assert_eq!(h.output_all(), rows);
        assert_eq!(h.status(), status);
    }

    #[tokio::test]
    async fn last_update_shows_end_time_once_ended() {
        let mut h = handle(&["true"]);
        h.start().unwrap();
        wait_settled(&mut h).await;
        let shown = h.last_update();
        assert_eq!(shown.len(), 8);
        assert_eq!(shown.matches(':').count(), 2);
    }
}
