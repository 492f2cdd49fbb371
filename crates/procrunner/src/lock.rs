//! Single-instance guard for a named run.
//!
//! Holds a non-blocking exclusive `flock` on `<dir>/<name>.lock` for as long
//! as the [`InstanceLock`] is alive. The kernel drops the lock when the
//! process exits, so a crashed run never leaves a stale lock behind.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::{debug, info};

/// Errors from acquiring the instance lock.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Run `{name}` is already active in another process")]
    AlreadyRunning { name: String, path: PathBuf },

    #[error("Failed to open lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: Errno,
    },
}

/// An acquired advisory lock; released on drop.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    _lock: Flock<File>,
}

impl InstanceLock {
    /// Try to take the lock for `name` inside `dir`, without waiting.
    pub fn acquire(dir: &Path, name: &str) -> Result<Self, LockError> {
        std::fs::create_dir_all(dir).map_err(|source| LockError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let path = dir.join(format!("{}.lock", sanitize_name(name)));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|source| LockError::Io {
                path: path.clone(),
                source,
            })?;

        let mut lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(lock) => lock,
            Err((_, Errno::EWOULDBLOCK)) => {
                debug!(path = %path.display(), "Lock held by another process");
                return Err(LockError::AlreadyRunning {
                    name: name.to_string(),
                    path,
                });
            }
            Err((_, source)) => return Err(LockError::Lock { path, source }),
        };

        // The PID is informational only.
        if lock.set_len(0).is_ok() {
            let _ = writeln!(lock, "{}", std::process::id());
        }

        info!(path = %path.display(), "Acquired instance lock");
        Ok(Self { path, _lock: lock })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Map a run name onto a safe file stem.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('.').is_empty() {
        "procrunner".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected_until_release() {
        let dir = tempfile::TempDir::new().unwrap();

        let first = InstanceLock::acquire(dir.path(), "nightly").unwrap();
        let second = InstanceLock::acquire(dir.path(), "nightly");
        assert!(matches!(second, Err(LockError::AlreadyRunning { .. })));

        drop(first);
        assert!(InstanceLock::acquire(dir.path(), "nightly").is_ok());
    }

    #[test]
    fn different_names_do_not_conflict() {
        let dir = tempfile::TempDir::new().unwrap();
        let _a = InstanceLock::acquire(dir.path(), "a").unwrap();
        assert!(InstanceLock::acquire(dir.path(), "b").is_ok());
    }

    #[test]
    fn lock_file_records_pid() {
        let dir = tempfile::TempDir::new().unwrap();
        let lock = InstanceLock::acquire(dir.path(), "pid").unwrap();
        let content = std::fs::read_to_string(lock.path()).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    #[test]
    fn creates_missing_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        let lock = InstanceLock::acquire(&nested, "run").unwrap();
        assert!(lock.path().starts_with(&nested));
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize_name("jobs/nightly run"), "jobs_nightly_run");
        assert_eq!(sanitize_name(".."), "procrunner");
        assert_eq!(sanitize_name("ok-name_1.2"), "ok-name_1.2");
    }
}
