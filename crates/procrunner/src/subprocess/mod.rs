//! Supervised child processes: handles, captured output and status.

pub mod handle;
pub mod output;
pub mod status;

pub use handle::{ProcessControl, ProcessHandle, SubprocessError};
pub use output::{DEFAULT_MAX_OUTPUT_ROWS, OutputBuffer};
pub use status::{ProcessStatus, classify};
