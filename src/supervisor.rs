//! The supervision loop.
//!
//! One iteration per poll tick: resolve the credential, compare it with the
//! one the running child was started with, and restart the child only when
//! the credential rotated or the child is gone. Resolution and comparison
//! always finish before any stop/start, and the old child is confirmed gone
//! before the new one is spawned, so at most one child is ever live.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{SupervisorConfig, VariantChangePolicy};
use crate::credential::{Credential, CredentialError, CredentialRegistry, ValidityWindow};
use crate::process::{Launcher, ProcessHandle, ProcessLauncher, StopOutcome, GRACE_PERIOD};
use crate::resolver::load_and_resolve;

/// Faults that end supervision.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    /// The credential changed variant underneath a running child.
    #[error("credential '{logical_name}' changed type on the fly: {source}")]
    VariantChanged {
        /// Logical credential name.
        logical_name: String,
        /// Comparison failure.
        source: CredentialError,
    },
}

/// Why a child is being (re)started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// No child was running.
    NoProcess,
    /// The credential rotated.
    Rotated,
    /// The credential is unchanged but the child exited.
    ChildExited,
    /// The credential variant changed and the policy allows a restart.
    VariantChanged,
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoProcess => "no_process",
            Self::Rotated => "rotated",
            Self::ChildExited => "child_exited",
            Self::VariantChanged => "variant_changed",
        };
        f.write_str(s)
    }
}

/// Result of a single supervision tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The credential could not be resolved; nothing was touched.
    Unresolved,
    /// The credential is unchanged and the child is alive.
    Unchanged,
    /// A new child was started.
    Started {
        /// Why the child was started.
        reason: RestartReason,
        /// Run id of the new child.
        run_id: Uuid,
    },
    /// Starting a new child failed; no child is running.
    StartFailed {
        /// Why a start was attempted.
        reason: RestartReason,
    },
}

/// Supervision state.
#[derive(Debug)]
pub enum State {
    /// No child is running.
    NoProcess,
    /// A child is running with the credential it holds.
    Running(ProcessHandle),
}

/// Drives one child process through credential rotations.
pub struct Supervisor<L = ProcessLauncher> {
    config: SupervisorConfig,
    registry: CredentialRegistry,
    launcher: L,
    state: State,
}

impl<L: Launcher> Supervisor<L> {
    /// Create a supervisor with no running child.
    pub fn new(config: SupervisorConfig, registry: CredentialRegistry, launcher: L) -> Self {
        Self {
            config,
            registry,
            launcher,
            state: State::NoProcess,
        }
    }

    /// Current supervision state.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// The launcher used to start children.
    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Credential of the running child, if any.
    pub fn active_credential(&self) -> Option<&dyn Credential> {
        match &self.state {
            State::Running(handle) => Some(handle.credential()),
            State::NoProcess => None,
        }
    }

    /// Handle of the running child, if any.
    pub fn process_mut(&mut self) -> Option<&mut ProcessHandle> {
        match &mut self.state {
            State::Running(handle) => Some(handle),
            State::NoProcess => None,
        }
    }

    /// Run one supervision iteration at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::VariantChanged`] when the credential's
    /// variant changed and the policy is [`VariantChangePolicy::Abort`].
    /// Every other fault is logged and reported through [`TickOutcome`].
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<TickOutcome, SupervisorError> {
        let logical_name = self.config.logical_name.as_str();
        let window = ValidityWindow::new(now, self.config.poll_interval);

        let resolved = match load_and_resolve(
            &self.config.document_path,
            logical_name,
            &self.config.variant,
            &self.registry,
            &window,
        )
        .await
        {
            Ok(credential) => credential,
            Err(e) => {
                error!(
                    logical_name,
                    error_kind = e.kind(),
                    error = %e,
                    "failed to resolve credential"
                );
                return Ok(TickOutcome::Unresolved);
            }
        };

        let reason = match &mut self.state {
            State::NoProcess => RestartReason::NoProcess,
            State::Running(handle) => match resolved.same_as(handle.credential()) {
                Ok(true) => {
                    if handle.is_alive() {
                        debug!(logical_name, run_id = %handle.run_id(), "credential unchanged");
                        return Ok(TickOutcome::Unchanged);
                    }
                    warn!(
                        logical_name,
                        run_id = %handle.run_id(),
                        code = ?handle.exit_code(),
                        "child exited on its own"
                    );
                    RestartReason::ChildExited
                }
                Ok(false) => {
                    info!(logical_name, run_id = %handle.run_id(), "credential rotated");
                    RestartReason::Rotated
                }
                Err(source) => match self.config.on_variant_change {
                    VariantChangePolicy::Abort => {
                        error!(
                            logical_name,
                            error_kind = "variant_changed",
                            error = %source,
                            "credential type changed, aborting supervision"
                        );
                        return Err(SupervisorError::VariantChanged {
                            logical_name: logical_name.to_owned(),
                            source,
                        });
                    }
                    VariantChangePolicy::Restart => {
                        warn!(
                            logical_name,
                            error = %source,
                            "credential type changed, restarting under the new type"
                        );
                        RestartReason::VariantChanged
                    }
                },
            },
        };

        Ok(self.restart(resolved, reason).await)
    }

    /// Poll forever, sleeping one interval between ticks.
    ///
    /// Only returns when supervision hits a fatal fault.
    pub async fn run(&mut self) -> SupervisorError {
        info!(
            logical_name = %self.config.logical_name,
            command = %self.config.command,
            variant = %self.config.variant,
            document = %self.config.document_path.display(),
            interval_secs = self.config.poll_interval.as_secs(),
            "supervision started"
        );

        loop {
            if let Err(e) = self.tick(Utc::now()).await {
                return e;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Gracefully stop the running child, if any.
    pub async fn shutdown(&mut self) -> Option<StopOutcome> {
        match std::mem::replace(&mut self.state, State::NoProcess) {
            State::Running(mut handle) => Some(handle.request_graceful_stop(GRACE_PERIOD).await),
            State::NoProcess => None,
        }
    }

    async fn restart(
        &mut self,
        credential: Box<dyn Credential>,
        reason: RestartReason,
    ) -> TickOutcome {
        let logical_name = self.config.logical_name.as_str();

        if let State::Running(mut previous) = std::mem::replace(&mut self.state, State::NoProcess)
        {
            let outcome = previous.request_graceful_stop(GRACE_PERIOD).await;
            info!(
                logical_name,
                run_id = %previous.run_id(),
                uptime_secs = previous.uptime_secs(Utc::now()),
                code = outcome.exit_code(),
                forced = outcome.was_forced(),
                "previous child stopped"
            );
        }

        match self.launcher.launch(&self.config.command, credential) {
            Ok(handle) => {
                let run_id = handle.run_id();
                info!(logical_name, run_id = %run_id, reason = %reason, "child running");
                self.state = State::Running(handle);
                TickOutcome::Started { reason, run_id }
            }
            Err(e) => {
                error!(
                    logical_name,
                    error_kind = "spawn_failed",
                    error = %e,
                    "cannot start child process"
                );
                TickOutcome::StartFailed { reason }
            }
        }
    }
}
