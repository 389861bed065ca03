//! Termination signals received by the supervisor itself.
//!
//! On SIGINT, SIGTERM or SIGHUP the supervisor exits immediately with
//! `128 + signal number`. The child is not stopped first; its teardown is
//! left to whoever signalled the supervisor (typically the process group).
//! The file logging guard is dropped before exiting so buffered JSON lines,
//! including the final one, reach disk.

use tracing::error;

use crate::logging::LoggingGuard;

/// Exit code for a supervisor terminated by `signo`.
pub fn exit_code_for(signo: i32) -> i32 {
    128_i32.saturating_add(signo)
}

/// Installed handlers for the supervisor's termination signals.
#[cfg(unix)]
#[derive(Debug)]
pub struct TerminationSignals {
    sigint: tokio::signal::unix::Signal,
    sigterm: tokio::signal::unix::Signal,
    sighup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl TerminationSignals {
    /// Install handlers for SIGINT, SIGTERM and SIGHUP.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if a handler cannot be installed.
    pub fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
            sighup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for the next termination signal and return its number.
    pub async fn recv(&mut self) -> i32 {
        use nix::sys::signal::Signal;

        let received = tokio::select! {
            _ = self.sigint.recv() => Signal::SIGINT,
            _ = self.sigterm.recv() => Signal::SIGTERM,
            _ = self.sighup.recv() => Signal::SIGHUP,
        };
        received as i32
    }
}

/// Installed Ctrl-C handler.
#[cfg(not(unix))]
#[derive(Debug)]
pub struct TerminationSignals;

#[cfg(not(unix))]
impl TerminationSignals {
    /// Nothing to install up front; Ctrl-C is registered on first wait.
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    /// Wait for Ctrl-C and return the SIGINT number.
    pub async fn recv(&mut self) -> i32 {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
        2
    }
}

/// Install handlers and spawn the task that exits the process on the first
/// termination signal.
///
/// The task takes ownership of `logging_guard` and flushes it before exit.
///
/// # Errors
///
/// Returns an error if the handlers cannot be installed.
pub fn spawn_exit_on_signal(
    logging_guard: Option<LoggingGuard>,
) -> std::io::Result<tokio::task::JoinHandle<()>> {
    let mut signals = TerminationSignals::install()?;
    Ok(tokio::spawn(async move {
        let signo = signals.recv().await;
        error!(signal = signo, "termination signal received");
        drop(logging_guard);
        std::process::exit(exit_code_for(signo));
    }))
}
