//! Child process ownership: spawn, environment injection, exit observation
//! and graceful-then-forced termination.
//!
//! Each [`ProcessHandle`] owns exactly one OS process. A dedicated background
//! task owns the `tokio::process::Child`, reaps it, and publishes the exit
//! code exactly once on a one-shot channel, so the supervision loop never
//! blocks on `wait()`. Termination and kill requests are routed through the
//! same task, so a signal is only ever delivered to an unreaped child.

use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::credential::Credential;

/// Time a child is given to exit after a termination request.
pub const GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Exit code reported when the child's status cannot be observed.
pub const WAIT_FAILED_EXIT_CODE: i32 = 128;

/// Program and arguments of the supervised command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable name or path.
    pub program: String,
    /// Arguments passed to the executable.
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Create a command from a program and its arguments.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Split an argv vector into program and arguments.
    ///
    /// Returns `None` when `argv` is empty.
    pub fn from_argv(mut argv: Vec<String>) -> Option<Self> {
        if argv.is_empty() {
            return None;
        }
        let program = argv.remove(0);
        Some(Self {
            program,
            args: argv,
        })
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Errors produced when a child process cannot be started.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    /// The OS refused to spawn the program.
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// How a stop request concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The child exited within the grace period.
    Exited(i32),
    /// The grace period elapsed and the child was killed.
    Forced(i32),
    /// The child had already exited before the request.
    AlreadyExited(i32),
}

impl StopOutcome {
    /// Exit code of the stopped child.
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Exited(code) | Self::Forced(code) | Self::AlreadyExited(code) => code,
        }
    }

    /// Whether a forced kill was needed.
    pub fn was_forced(self) -> bool {
        matches!(self, Self::Forced(_))
    }
}

/// Request sent to the task that owns the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    /// Ask the child to exit (SIGTERM).
    Terminate,
    /// Kill the child outright (SIGKILL).
    Kill,
}

/// Owns one running child process and the credential it was started with.
#[derive(Debug)]
pub struct ProcessHandle {
    run_id: Uuid,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    credential: Box<dyn Credential>,
    exit_rx: oneshot::Receiver<i32>,
    exit_code: Option<i32>,
    control_tx: mpsc::UnboundedSender<Control>,
}

impl ProcessHandle {
    /// Spawn `command` with the credential's variables in its environment.
    ///
    /// The child inherits the supervisor's environment and standard streams.
    /// Credential variables are applied afterwards and take precedence over
    /// inherited variables of the same name.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`StartError::Spawn`] if the program cannot be executed.
    pub fn start(
        command: &CommandSpec,
        credential: Box<dyn Credential>,
    ) -> Result<Self, StartError> {
        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        // Command::env overrides anything inherited from the parent.
        cmd.envs(credential.environment());

        let child = cmd.spawn().map_err(|source| StartError::Spawn {
            program: command.program.clone(),
            source,
        })?;

        let run_id = Uuid::new_v4();
        let pid = child.id();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        tokio::spawn(observe_exit(child, run_id, control_rx, exit_tx));

        info!(
            run_id = %run_id,
            pid = ?pid,
            command = %command,
            variant = credential.variant(),
            "child process started"
        );

        Ok(Self {
            run_id,
            pid,
            started_at: Utc::now(),
            credential,
            exit_rx,
            exit_code: None,
            control_tx,
        })
    }

    /// Identifier correlating log lines for this child.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// OS process id, if the child was still running when spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// When the child was started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Whole seconds since the child was started, as of `now`.
    pub fn uptime_secs(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.started_at).num_seconds().max(0)
    }

    /// The credential injected into this child.
    pub fn credential(&self) -> &dyn Credential {
        self.credential.as_ref()
    }

    /// Exit code if the child has already terminated, without waiting.
    pub fn exit_code(&mut self) -> Option<i32> {
        if self.exit_code.is_none() {
            match self.exit_rx.try_recv() {
                Ok(code) => self.exit_code = Some(code),
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => {
                    self.exit_code = Some(WAIT_FAILED_EXIT_CODE);
                }
            }
        }
        self.exit_code
    }

    /// Whether the child is still running.
    pub fn is_alive(&mut self) -> bool {
        self.exit_code().is_none()
    }

    /// Wait until the child terminates and return its exit code.
    pub async fn wait_exit(&mut self) -> i32 {
        if let Some(code) = self.exit_code() {
            return code;
        }
        let code = (&mut self.exit_rx)
            .await
            .unwrap_or(WAIT_FAILED_EXIT_CODE);
        self.exit_code = Some(code);
        code
    }

    /// Ask the child to terminate, killing it if it outlives `grace`.
    ///
    /// Does not return until the child is confirmed gone.
    pub async fn request_graceful_stop(&mut self, grace: Duration) -> StopOutcome {
        if let Some(code) = self.exit_code() {
            debug!(run_id = %self.run_id, code, "child already exited");
            return StopOutcome::AlreadyExited(code);
        }

        info!(run_id = %self.run_id, pid = ?self.pid, "requesting child termination");
        self.send_control(Control::Terminate);

        if let Ok(code) = tokio::time::timeout(grace, self.wait_exit()).await {
            info!(run_id = %self.run_id, code, "child exited after termination request");
            return StopOutcome::Exited(code);
        }

        warn!(
            run_id = %self.run_id,
            grace_secs = grace.as_secs(),
            "child did not exit within grace period, killing"
        );
        self.send_control(Control::Kill);
        let code = self.wait_exit().await;
        info!(run_id = %self.run_id, code, "child killed");
        StopOutcome::Forced(code)
    }

    fn send_control(&self, control: Control) {
        // A closed channel means the child is already reaped.
        if self.control_tx.send(control).is_err() {
            debug!(run_id = %self.run_id, ?control, "child already reaped, request dropped");
        }
    }
}

/// Starts child processes for the supervision loop.
pub trait Launcher: Send + Sync {
    /// Start `command` with `credential` injected into its environment.
    ///
    /// # Errors
    ///
    /// Returns a [`StartError`] if the process cannot be spawned.
    fn launch(
        &self,
        command: &CommandSpec,
        credential: Box<dyn Credential>,
    ) -> Result<ProcessHandle, StartError>;
}

/// Launcher that spawns real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(
        &self,
        command: &CommandSpec,
        credential: Box<dyn Credential>,
    ) -> Result<ProcessHandle, StartError> {
        ProcessHandle::start(command, credential)
    }
}

/// Reap `child` and publish its exit code once.
///
/// Control requests are served only while the child is unreaped. Once every
/// sender is dropped the task simply waits for the child.
async fn observe_exit(
    mut child: Child,
    run_id: Uuid,
    mut control_rx: mpsc::UnboundedReceiver<Control>,
    exit_tx: oneshot::Sender<i32>,
) {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(control) = control_rx.recv() => match control {
                Control::Terminate => terminate(&mut child, run_id),
                Control::Kill => {
                    if let Err(e) = child.start_kill() {
                        debug!(run_id = %run_id, error = %e, "kill failed, child likely already exited");
                    }
                    break child.wait().await;
                }
            },
        }
    };

    let code = normalize_exit(&status);
    match &status {
        Ok(status) => debug!(run_id = %run_id, code, status = %status, "child exited"),
        Err(e) => warn!(run_id = %run_id, error = %e, "failed to wait for child"),
    }

    // The handle may already be gone.
    let _ = exit_tx.send(code);
}

#[cfg(unix)]
fn terminate(child: &mut Child, run_id: Uuid) {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // `id()` is `None` once tokio has reaped the child.
    let Some(raw) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };

    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => debug!(run_id = %run_id, pid = raw, "SIGTERM sent"),
        Err(Errno::ESRCH) => debug!(run_id = %run_id, pid = raw, "child already gone"),
        Err(e) => warn!(run_id = %run_id, pid = raw, error = %e, "failed to send SIGTERM"),
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, run_id: Uuid) {
    // No polite termination request exists here; go straight to kill.
    if let Err(e) = child.start_kill() {
        debug!(run_id = %run_id, error = %e, "kill failed, child likely already exited");
    }
}

/// Map a wait result onto a single exit code.
///
/// Natural exits keep their code, signal deaths become `128 + signal`, and
/// anything unobservable becomes [`WAIT_FAILED_EXIT_CODE`].
pub fn normalize_exit(status: &std::io::Result<ExitStatus>) -> i32 {
    match status {
        Ok(status) => status
            .code()
            .or_else(|| terminating_signal(status).map(|sig| 128_i32.saturating_add(sig)))
            .unwrap_or(WAIT_FAILED_EXIT_CODE),
        Err(_) => WAIT_FAILED_EXIT_CODE,
    }
}

#[cfg(unix)]
fn terminating_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn terminating_signal(_status: &ExitStatus) -> Option<i32> {
    None
}
