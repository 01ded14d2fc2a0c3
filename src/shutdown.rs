//! Signal-driven stop and child-exit flags.
//!
//! `SIGINT`, `SIGQUIT` and `SIGTERM` set the stop flag that the accept loop
//! checks on every iteration. `SIGCHLD` sets a separate flag telling the
//! loop that forked workers are waiting to be reaped.

use crate::error::ServerError;
use signal_hook::consts::signal::{SIGCHLD, SIGINT, SIGQUIT, SIGTERM};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared boolean raised from a signal handler.
#[derive(Debug, Clone, Default)]
pub struct SignalFlag(Arc<AtomicBool>);

impl SignalFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag.
    #[cfg(test)]
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Read and lower the flag in one step.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    /// Raise this flag whenever one of `signals` is delivered.
    pub fn register(&self, signals: &[i32]) -> Result<(), ServerError> {
        for &signal in signals {
            signal_hook::flag::register(signal, Arc::clone(&self.0))
                .map_err(ServerError::Signal)?;
            debug!(signal, "Signal handler installed");
        }
        Ok(())
    }
}

/// Raise `flag` on interrupt, quit or terminate.
pub fn install_stop_signals(flag: &SignalFlag) -> Result<(), ServerError> {
    flag.register(&[SIGINT, SIGQUIT, SIGTERM])
}

/// Raise `flag` whenever a child process exits.
pub fn install_child_signal(flag: &SignalFlag) -> Result<(), ServerError> {
    flag.register(&[SIGCHLD])
}
