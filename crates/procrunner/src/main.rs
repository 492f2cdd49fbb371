//! `procrunner`
//!
//! Runs the commands listed in a command file, at most N at a time, with a
//! live status section per process. Ctrl+C or SIGTERM forwards the signal to
//! every running child and waits for them to exit.

use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::info;

use procrunner::lock::{InstanceLock, LockError};
use procrunner::render::ConsoleRenderer;
use procrunner::source::{CommandFile, CommandSource};
use procrunner::supervisor::{Supervisor, SupervisorOptions, spawn_signal_listener};
use procrunner_core::Config;

#[derive(Parser, Debug)]
#[command(name = "procrunner")]
#[command(version, about = "Run a batch of commands with bounded concurrency")]
struct Args {
    /// Command file: `.toml` with `[[command]] args = [...]`, or plain text
    /// with one command per line
    #[arg(short = 'f', long, env = "PROCRUNNER_FILE")]
    file: PathBuf,

    /// Maximum concurrent processes
    #[arg(short = 'c', long)]
    concurrent_processes: Option<usize>,

    /// Wait a random 30-90 seconds between two launches
    #[arg(short = 'd', long)]
    auto_delay: bool,

    /// Show the full output of each process instead of the last rows
    #[arg(short = 'l', long)]
    show_detailed_logs: bool,

    /// Shuffle the commands before the first launch
    #[arg(short = 's', long)]
    shuffle: bool,

    /// Run name guarding against concurrent invocations (defaults to the
    /// command file name)
    #[arg(long)]
    name: Option<String>,

    /// Interval between two status polls, in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Output rows kept per process
    #[arg(long)]
    max_output_rows: Option<usize>,

    /// Directory for the instance lock file
    #[arg(long, env = "PROCRUNNER_LOCK_DIR")]
    lock_dir: Option<PathBuf>,

    /// Project directory holding `.procrunner/settings.json`
    #[arg(long)]
    project_dir: Option<PathBuf>,

    /// Log level (e.g. "info", "debug"); defaults to "warn" under the live
    /// display and "info" otherwise
    #[arg(long)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "PROCRUNNER_LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// Layer command-line values over the resolved configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(n) = self.concurrent_processes {
            config.runner.concurrent_processes = n;
        }
        if self.auto_delay {
            config.runner.auto_delay = true;
        }
        if self.show_detailed_logs {
            config.display.show_detailed_logs = true;
        }
        if self.shuffle {
            config.runner.shuffle = true;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.runner.poll_interval_ms = ms;
        }
        if let Some(rows) = self.max_output_rows {
            config.runner.max_output_rows = rows;
        }
        if let Some(dir) = &self.lock_dir {
            config.runner.lock_dir = Some(dir.clone());
        }
        if let Some(level) = &self.log_level {
            config.logging.level = Some(level.clone());
        }
        if self.log_json {
            config.logging.json = true;
        }
    }

    fn run_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| file_stem(&self.file))
            .unwrap_or_else(|| "procrunner".to_string())
    }
}

fn file_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().into_owned())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let project_dir = match &args.project_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let mut config = procrunner_core::config::load_config(Some(&project_dir))?;
    args.apply(&mut config);
    config.validate()?;

    let renderer = ConsoleRenderer::stdout();
    // Logs on stderr share the screen with an in-place redraw only when both
    // streams are the terminal.
    let shares_screen = renderer.is_interactive() && std::io::stderr().is_terminal();
    procrunner_core::tracing_init::init_tracing(&config.logging, shares_screen);

    let name = args.run_name();
    let _lock = match InstanceLock::acquire(&config.runner.lock_dir(), &name) {
        Ok(lock) => lock,
        Err(LockError::AlreadyRunning { .. }) => {
            info!(name = %name, "Another instance holds the lock, exiting");
            writeln!(
                std::io::stdout(),
                "The command is already running in another process."
            )?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let commands = CommandFile::new(&args.file).commands()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        file = %args.file.display(),
        commands = commands.len(),
        concurrency = config.runner.concurrent_processes,
        "Starting procrunner"
    );

    let mut supervisor = Supervisor::new(SupervisorOptions::from_config(&config), renderer);
    let listener = spawn_signal_listener(supervisor.stop_handle())?;

    let summary = supervisor.run(commands).await?;
    listener.abort();

    info!(
        done = summary.done,
        errored = summary.errored,
        terminated = summary.terminated,
        "procrunner stopped"
    );
    Ok(())
}
