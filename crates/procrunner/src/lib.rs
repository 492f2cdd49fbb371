//! procrunner library
//!
//! Runs a list of independent external commands under a concurrency limit:
//! - Process handles with bounded output capture and derived status
//! - The supervisor polling loop with launch pacing and clean shutdown
//! - Command sources, status rendering and the single-instance lock

pub mod lock;
pub mod render;
pub mod source;
pub mod subprocess;
pub mod supervisor;
