//! The supervisor polling loop.
//!
//! One cooperative loop admits queued commands under the concurrency limit
//! and the launch pacing, polls every live process, reports it, then sleeps
//! for the poll interval. Children run concurrently as OS processes; the
//! loop only samples them.

use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use tracing::{debug, info, warn};

use procrunner_core::Config;

use crate::render::{OutputMode, ProcessReport, Renderer};
use crate::source::Command;
use crate::subprocess::{DEFAULT_MAX_OUTPUT_ROWS, ProcessHandle, ProcessStatus, SubprocessError};

use super::admission::LaunchPacer;
use super::stop::StopHandle;

/// Polls spent waiting for exited processes to flush their output streams
/// after the loop is done.
const SETTLE_ATTEMPTS: usize = 20;

/// Errors that end a supervisor run.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Cannot poll child process: {0}")]
    Poll(#[from] SubprocessError),
}

/// Tuning for one supervisor run.
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Maximum simultaneously running processes (at least 1).
    pub concurrency: usize,
    /// Random launch gap range, `None` to launch without delay.
    pub delay: Option<(Duration, Duration)>,
    pub poll_interval: Duration,
    pub max_output_rows: usize,
    pub shuffle: bool,
    pub output_mode: OutputMode,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            delay: None,
            poll_interval: Duration::from_millis(250),
            max_output_rows: DEFAULT_MAX_OUTPUT_ROWS,
            shuffle: false,
            output_mode: OutputMode::Tail(5),
        }
    }
}

impl SupervisorOptions {
    pub fn from_config(config: &Config) -> Self {
        let output_mode = if config.display.show_detailed_logs {
            OutputMode::Full
        } else {
            OutputMode::Tail(config.display.tail_rows)
        };
        Self {
            concurrency: config.runner.concurrent_processes,
            delay: config.runner.delay_range(),
            poll_interval: config.runner.poll_interval(),
            max_output_rows: config.runner.max_output_rows,
            shuffle: config.runner.shuffle,
            output_mode,
        }
    }
}

/// Final state of one launched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub index: usize,
    pub command: Command,
    pub status: ProcessStatus,
    pub manual_terminated: bool,
    /// Offset of the launch from the start of the run.
    pub started_after: Duration,
    /// Offset of the first observed exit from the start of the run.
    pub ended_after: Option<Duration>,
    pub output_rows: usize,
}

/// What a run did, returned by [`Supervisor::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub total_commands: usize,
    pub total_started: usize,
    pub done: usize,
    pub errored: usize,
    pub terminated: usize,
    /// Highest number of simultaneously running processes observed.
    pub peak_running: usize,
    pub elapsed: Duration,
    /// One entry per launched command, in launch order.
    pub outcomes: Vec<ProcessOutcome>,
}

impl RunSummary {
    pub const fn not_started(&self) -> usize {
        self.total_commands.saturating_sub(self.total_started)
    }

    fn collect(
        handles: &[ProcessHandle],
        total_commands: usize,
        peak_running: usize,
        run_start: Instant,
    ) -> Self {
        let offset = |at: Instant| at.saturating_duration_since(run_start);
        let outcomes: Vec<ProcessOutcome> = handles
            .iter()
            .map(|h| ProcessOutcome {
                index: h.index(),
                command: h.command().clone(),
                status: h.status(),
                manual_terminated: h.manual_terminated(),
                started_after: h.start_time().map_or(Duration::ZERO, offset),
                ended_after: h.end_time().map(offset),
                output_rows: h.output().len(),
            })
            .collect();
        let count = |status| outcomes.iter().filter(|o| o.status == status).count();

        Self {
            total_commands,
            total_started: handles.len(),
            done: count(ProcessStatus::Done),
            errored: count(ProcessStatus::Error),
            terminated: count(ProcessStatus::Terminated),
            peak_running,
            elapsed: run_start.elapsed(),
            outcomes,
        }
    }
}

/// Runs a list of commands under a concurrency limit.
pub struct Supervisor<R: Renderer> {
    options: SupervisorOptions,
    renderer: R,
    stop: StopHandle,
}

impl<R: Renderer> Supervisor<R> {
    pub fn new(options: SupervisorOptions, renderer: R) -> Self {
        Self {
            options,
            renderer,
            stop: StopHandle::new(),
        }
    }

    /// Handle for requesting a stop from outside the loop.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub const fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn into_renderer(self) -> R {
        self.renderer
    }

    /// Run `commands` until all have finished, or until a stop was requested
    /// and every launched process has exited.
    ///
    /// Commands are launched from the back of the list. Individual command
    /// failures never end the run; only a failure to poll a child does.
    pub async fn run(&mut self, commands: Vec<Command>) -> Result<RunSummary, SupervisorError> {
        let run_start = Instant::now();
        let total_commands = commands.len();
        let concurrency = self.options.concurrency.max(1);

        let mut queue = commands;
        if self.options.shuffle {
            queue.shuffle(&mut rand::thread_rng());
        }

        info!(
            commands = total_commands,
            concurrency,
            paced = self.options.delay.is_some(),
            "Starting supervisor run"
        );
        if let Err(e) = self.renderer.overview(&queue) {
            warn!(error = %e, "Failed to render overview");
        }

        let mut handles: Vec<ProcessHandle> = Vec::new();
        let mut pacer = LaunchPacer::new(self.options.delay);
        let mut peak_running = 0;

        loop {
            for handle in handles.iter_mut().filter(|h| h.is_running()) {
                handle.refresh_exit()?;
            }
            let mut running = count_running(&handles);

            // Registration is the admission gate: it is refused once a stop
            // was requested, and a later stop reaches every registered child.
            while running < concurrency && !queue.is_empty() && pacer.ready(Instant::now()) {
                let Some(command) = queue.pop() else {
                    break;
                };
                let mut handle =
                    ProcessHandle::new(handles.len(), command, self.options.max_output_rows);
                if !self.stop.register(handle.control()) {
                    debug!("Stop requested, admission closed");
                    queue.push(handle.command().clone());
                    break;
                }
                if let Err(e) = handle.start() {
                    warn!(index = handle.index(), error = %e, "Command failed to launch");
                    // Already settled, so no later poll would report it.
                    self.report(&handle);
                }
                if handle.is_running() {
                    running += 1;
                }
                handles.push(handle);
                pacer.record_launch(Instant::now());
                if pacer.is_paced() {
                    debug!(next_delay = ?pacer.next_delay(), "Next launch delayed");
                }
            }
            peak_running = peak_running.max(running);

            self.poll_and_report(&mut handles)?;

            let running = count_running(&handles);
            if running == 0 && (queue.is_empty() || self.stop.is_requested()) {
                break;
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }

        self.settle(&mut handles).await?;

        let summary = RunSummary::collect(&handles, total_commands, peak_running, run_start);
        info!(
            started = summary.total_started,
            done = summary.done,
            errored = summary.errored,
            terminated = summary.terminated,
            not_started = summary.not_started(),
            "Supervisor run finished"
        );
        if let Err(e) = self.renderer.summary(&summary) {
            warn!(error = %e, "Failed to render summary");
        }
        Ok(summary)
    }

    /// Update and report every handle that has not settled yet.
    fn poll_and_report(&mut self, handles: &mut [ProcessHandle]) -> Result<(), SupervisorError> {
        for handle in handles.iter_mut().filter(|h| !h.is_settled()) {
            handle.update()?;
            self.report(handle);
        }
        if let Err(e) = self.renderer.flush() {
            warn!(error = %e, "Failed to flush status output");
        }
        Ok(())
    }

    fn report(&mut self, handle: &ProcessHandle) {
        let report = ProcessReport::from_handle(handle, self.options.output_mode);
        if let Err(e) = self.renderer.report(&report) {
            warn!(index = handle.index(), error = %e, "Failed to render process status");
        }
    }

    /// Give exited processes a few more polls to deliver trailing output.
    async fn settle(&mut self, handles: &mut [ProcessHandle]) -> Result<(), SupervisorError> {
        for _ in 0..SETTLE_ATTEMPTS {
            if handles.iter().all(ProcessHandle::is_settled) {
                break;
            }
            tokio::time::sleep(self.options.poll_interval.min(Duration::from_millis(50))).await;
            self.poll_and_report(handles)?;
        }
        Ok(())
    }
}

fn count_running(handles: &[ProcessHandle]) -> usize {
    handles
        .iter()
        .filter(|h| h.status() == ProcessStatus::Running)
        .count()
}
