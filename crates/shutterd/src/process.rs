//! Lifecycle of the external camera process.
//!
//! A [`ProcessHandle`] owns one spawned camera tool. A supervisor task
//! waits on the child and publishes a [`ProcessExit`] exactly once, whether
//! the tool stopped on its own (run duration reached, hardware error) or
//! was killed. Killing sends SIGTERM first, like `raspistill` expects, and
//! escalates to SIGKILL after [`KILL_GRACE`].
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Spawn failures are returned as `CameraError::Spawn`

use std::process::Stdio;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shutter_core::{CameraCommand, CameraError};

/// How long a terminated process gets to exit before SIGKILL.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

/// How a camera process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessExit {
    /// The process exited by itself.
    Exited {
        /// Exit code, `None` if terminated by a signal
        code: Option<i32>,
    },

    /// The process was stopped through [`ProcessHandle::kill`].
    Killed,

    /// Waiting on the process failed; its state is unknown.
    Lost { reason: String },
}

impl std::fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited { code: Some(code) } => write!(f, "exited with code {code}"),
            Self::Exited { code: None } => write!(f, "terminated by signal"),
            Self::Killed => write!(f, "killed"),
            Self::Lost { reason } => write!(f, "lost: {reason}"),
        }
    }
}

/// Starts camera processes.
///
/// The daemon uses [`SystemLauncher`]; tests substitute launchers that run
/// scripts or count invocations.
pub trait Launcher: Send + Sync + 'static {
    fn launch(&self, command: &CameraCommand) -> Result<ProcessHandle, CameraError>;
}

/// Spawns the configured executable as an OS process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn launch(&self, command: &CameraCommand) -> Result<ProcessHandle, CameraError> {
        ProcessHandle::spawn(command)
    }
}

/// One running (or finished) camera process.
///
/// Dropping the handle does not wait for the process, but the child is
/// spawned with `kill_on_drop` so the supervisor never leaves an orphan.
pub struct ProcessHandle {
    program: String,
    pid: Option<u32>,
    kill_token: CancellationToken,
    exit_rx: watch::Receiver<Option<ProcessExit>>,
}

impl ProcessHandle {
    /// Spawns `command` and starts supervising it.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// `CameraError::Spawn` if the executable is missing or not runnable.
    pub fn spawn(command: &CameraCommand) -> Result<Self, CameraError> {
        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CameraError::spawn(&command.program, e))?;

        let pid = child.id();
        let kill_token = CancellationToken::new();
        let (exit_tx, exit_rx) = watch::channel(None);

        info!(pid = ?pid, command = %command, "Camera process started");

        tokio::spawn(supervise(
            child,
            command.program.clone(),
            kill_token.clone(),
            exit_tx,
        ));

        Ok(Self {
            program: command.program.clone(),
            pid,
            kill_token,
            exit_rx,
        })
    }

    /// OS process id, if known.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns true once the process is gone.
    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }

    /// Requests termination.
    ///
    /// Returns `false` without sending anything if the process already
    /// exited or a kill was already requested.
    pub fn kill(&self) -> bool {
        if self.has_exited() || self.kill_token.is_cancelled() {
            return false;
        }
        debug!(pid = ?self.pid, program = %self.program, "Killing camera process");
        self.kill_token.cancel();
        true
    }

    /// Waits until the process has exited.
    pub async fn exited(&self) -> ProcessExit {
        self.exit_notifier().wait().await
    }

    /// A detached waiter for the exit, usable from another task.
    pub fn exit_notifier(&self) -> ExitNotifier {
        ExitNotifier {
            rx: self.exit_rx.clone(),
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("program", &self.program)
            .field("pid", &self.pid)
            .field("exited", &self.has_exited())
            .finish()
    }
}

/// Resolves when the associated process exits.
#[derive(Debug, Clone)]
pub struct ExitNotifier {
    rx: watch::Receiver<Option<ProcessExit>>,
}

impl ExitNotifier {
    pub async fn wait(mut self) -> ProcessExit {
        match self.rx.wait_for(Option::is_some).await {
            Ok(exit) => (*exit).clone().unwrap_or(ProcessExit::Lost {
                reason: "no exit status recorded".to_string(),
            }),
            Err(_) => ProcessExit::Lost {
                reason: "supervisor stopped".to_string(),
            },
        }
    }
}

/// Waits for the child to exit or for a kill request, then publishes the outcome.
async fn supervise(
    mut child: Child,
    program: String,
    kill_token: CancellationToken,
    exit_tx: watch::Sender<Option<ProcessExit>>,
) {
    let exit = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => ProcessExit::Exited { code: status.code() },
            Err(e) => ProcessExit::Lost { reason: e.to_string() },
        },
        _ = kill_token.cancelled() => terminate(&mut child).await,
    };

    debug!(program = %program, exit = %exit, "Camera process finished");
    let _ = exit_tx.send(Some(exit));
}

/// SIGTERM, then SIGKILL if the process ignores it.
async fn terminate(child: &mut Child) -> ProcessExit {
    if let Some(pid) = child.id() {
        if !send_sigterm(pid) {
            let _ = child.start_kill();
        }
    }

    match timeout(KILL_GRACE, child.wait()).await {
        Ok(_) => ProcessExit::Killed,
        Err(_) => {
            warn!(pid = ?child.id(), "Camera process ignored SIGTERM, sending SIGKILL");
            let _ = child.kill().await;
            ProcessExit::Killed
        }
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) -> bool {
    false
}
