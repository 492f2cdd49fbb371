//! Supervisor loop: admission, polling and shutdown of queued commands.
//!
//! - [`Supervisor`]: the polling loop driving a run to completion.
//! - [`LaunchPacer`]: minimum gap between two launches.
//! - [`StopHandle`]: asynchronous stop requests, fed by the signal listener.

pub mod admission;
pub mod runner;
pub mod stop;

pub use admission::LaunchPacer;
pub use runner::{ProcessOutcome, RunSummary, Supervisor, SupervisorError, SupervisorOptions};
pub use stop::{StopHandle, spawn_signal_listener};
