//! Process lifecycle status and its classification.

use std::fmt;

/// Lifecycle status of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessStatus {
    /// Launched and not yet observed to exit.
    Running,
    /// Exited with a success code.
    Done,
    /// Stopped after a manual termination request.
    Terminated,
    /// Failed to launch, exited with a failure code, or was killed externally.
    Error,
}

impl ProcessStatus {
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Done => "done",
            Self::Terminated => "terminated",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Derive the status from observed exit facts.
///
/// A success code wins over the manual termination flag: a child that traps
/// the signal and exits cleanly is `Done`.
pub const fn classify(
    exit_observed: bool,
    exit_succeeded: bool,
    manual_terminated: bool,
) -> ProcessStatus {
    if exit_observed && exit_succeeded {
        ProcessStatus::Done
    } else if exit_observed {
        if manual_terminated {
            ProcessStatus::Terminated
        } else {
            ProcessStatus::Error
        }
    } else {
        ProcessStatus::Running
    }
}
