//! Stop requests and the OS signal listener.
//!
//! A [`StopHandle`] is shared between the supervisor loop and whoever asks
//! it to stop. Requesting a stop sets the flag and, in the same critical
//! section, forwards a signal to every registered process that is still
//! alive. Registration takes the same lock, so a process is either
//! registered before the stop (and gets signalled) or refused after it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nix::sys::signal::Signal;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::subprocess::ProcessControl;

#[derive(Debug, Default)]
struct StopInner {
    requested: AtomicBool,
    controls: Mutex<Vec<Arc<ProcessControl>>>,
}

/// Cloneable handle to request a supervisor stop.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    inner: Arc<StopInner>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    fn controls(&self) -> MutexGuard<'_, Vec<Arc<ProcessControl>>> {
        self.inner
            .controls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::SeqCst)
    }

    /// Track a process so a later stop reaches it.
    ///
    /// Returns `false`, without registering, once a stop was requested.
    pub fn register(&self, control: Arc<ProcessControl>) -> bool {
        let mut controls = self.controls();
        if self.is_requested() {
            return false;
        }
        controls.push(control);
        true
    }

    /// Request a stop and forward `signal` to every live process.
    ///
    /// Returns how many processes were signalled. Calling it again re-sends
    /// the signal to the processes that are still alive.
    pub fn request_stop(&self, signal: Signal) -> usize {
        let controls = self.controls();
        self.inner.requested.store(true, Ordering::SeqCst);

        let mut signalled = 0;
        for control in controls.iter() {
            match control.terminate(signal) {
                Ok(true) => signalled += 1,
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Failed to forward stop signal"),
            }
        }
        info!(%signal, signalled, "Stop requested");
        signalled
    }
}

/// Listen for SIGINT and SIGTERM and turn each one into a stop request that
/// forwards the same signal to the children.
pub fn spawn_signal_listener(stop: StopHandle) -> std::io::Result<JoinHandle<()>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            let received = tokio::select! {
                Some(()) = interrupt.recv() => Signal::SIGINT,
                Some(()) = terminate.recv() => Signal::SIGTERM,
                else => break,
            };
            info!(signal = %received, "Received shutdown signal");
            stop.request_stop(received);
        }
    }))
}
