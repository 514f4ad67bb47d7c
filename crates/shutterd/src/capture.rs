//! Single on-demand photo capture.
//!
//! ```text
//! Idle ─▶ Starting ─▶ AwaitingArtifact ─▶ Renaming ─▶ Complete
//!            │               │                │
//!            └───────────────┴────────────────┴──▶ Failed(reason)
//! ```
//!
//! A session owns its own process and watcher, independent of the live
//! view. The first finished artifact wins; later ones are ignored. The wait
//! is bounded by the request's timeout, and a process that exits without
//! producing anything fails the session as a timeout.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Every failure path resolves the session as `Failed`

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use shutter_core::{CameraError, CaptureRequest, CapturedPhoto, PhotoStamp, ReadinessEvent};

use crate::process::{Launcher, ProcessHandle};
use crate::watcher::{FileReadinessWatcher, WatchTarget};

/// Why a capture failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    Spawn,
    Timeout,
    Rename,
}

impl From<&CameraError> for FailureReason {
    fn from(err: &CameraError) -> Self {
        match err {
            CameraError::Spawn { .. } => Self::Spawn,
            CameraError::Rename { .. } => Self::Rename,
            CameraError::CaptureTimeout { .. } | CameraError::DirectoryRead { .. } => {
                Self::Timeout
            }
        }
    }
}

/// Where a capture session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Starting,
    AwaitingArtifact,
    Renaming,
    Complete,
    Failed(FailureReason),
}

impl CaptureState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed(_))
    }
}

/// Drives one photo from spawn to rename.
pub struct CaptureSession {
    request: CaptureRequest,
    binary: String,
    poll_interval: Duration,
    launcher: Arc<dyn Launcher>,
    state: CaptureState,
}

impl CaptureSession {
    pub fn new(
        request: CaptureRequest,
        binary: impl Into<String>,
        poll_interval: Duration,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        Self {
            request,
            binary: binary.into(),
            poll_interval,
            launcher,
            state: CaptureState::Idle,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Takes the photo.
    ///
    /// A session runs once. Calling `run` again, after any outcome, does
    /// not touch the camera: it returns `CaptureTimeout` with a zero wait
    /// and leaves [`state`](Self::state) at the first run's result.
    ///
    /// # Errors
    ///
    /// - `CameraError::Spawn` if the camera could not be started
    /// - `CameraError::CaptureTimeout` if no artifact appeared in time, or
    ///   the session was already run
    /// - `CameraError::Rename` if the artifact could not be finalised
    pub async fn run(&mut self) -> Result<CapturedPhoto, CameraError> {
        if self.state != CaptureState::Idle {
            warn!(state = ?self.state, "Capture session reused, ignoring");
            return Err(CameraError::CaptureTimeout {
                waited: Duration::ZERO,
            });
        }

        let result = self.drive().await;
        match &result {
            Ok(photo) => {
                info!(file = %photo.file_name, "Photo captured");
            }
            Err(e) => {
                warn!(error = %e, code = e.code(), "Photo capture failed");
                self.transition(CaptureState::Failed(FailureReason::from(e)));
            }
        }
        result
    }

    async fn drive(&mut self) -> Result<CapturedPhoto, CameraError> {
        self.transition(CaptureState::Starting);

        let (watcher, mut events) = FileReadinessWatcher::spawn(
            WatchTarget::Directory {
                dir: self.request.directory.clone(),
                naming: self.request.naming.clone(),
            },
            self.poll_interval,
        );

        let command = self.request.command(&self.binary);
        let process = self.launcher.launch(&command)?;
        self.transition(CaptureState::AwaitingArtifact);

        let awaited = self.await_artifact(&process, &mut events).await;

        // Listeners are torn down on every outcome.
        watcher.cancel();
        process.kill();
        let event = awaited?;

        self.transition(CaptureState::Renaming);
        let photo = finalize(&event.source_path, &self.request.directory).await?;
        self.transition(CaptureState::Complete);
        Ok(photo)
    }

    /// Resolves with the first finished artifact, or a timeout.
    async fn await_artifact(
        &self,
        process: &ProcessHandle,
        events: &mut mpsc::Receiver<ReadinessEvent>,
    ) -> Result<ReadinessEvent, CameraError> {
        let started = Instant::now();
        let deadline = self.request.timeout;

        let exit = tokio::select! {
            event = events.recv() => {
                return event.ok_or(CameraError::CaptureTimeout { waited: started.elapsed() });
            }
            exit = process.exited() => exit,
            _ = sleep(deadline) => {
                return Err(CameraError::CaptureTimeout { waited: deadline });
            }
        };

        // Still cameras exit right after writing; give the poller a chance
        // to observe that final write before calling it a failure.
        debug!(exit = %exit, "Camera exited before an artifact was seen");
        match timeout(self.exit_grace(), events.recv()).await {
            Ok(Some(event)) => Ok(event),
            _ => Err(CameraError::CaptureTimeout {
                waited: started.elapsed(),
            }),
        }
    }

    fn exit_grace(&self) -> Duration {
        self.poll_interval.saturating_mul(3)
    }

    fn transition(&mut self, next: CaptureState) {
        debug!(from = ?self.state, to = ?next, "Capture state change");
        self.state = next;
    }
}

/// Renames `artifact` to `<stamp><.ext>` inside `directory`.
///
/// On failure the artifact is left where it was.
pub async fn finalize(artifact: &Path, directory: &Path) -> Result<CapturedPhoto, CameraError> {
    let extension = artifact.extension().and_then(|e| e.to_str());
    let stamp = PhotoStamp::next();
    let file_name = stamp.file_name(extension);
    let target = directory.join(&file_name);

    let rename_error = |reason: String| CameraError::Rename {
        from: artifact.to_path_buf(),
        to: target.clone(),
        reason,
    };

    if tokio::fs::try_exists(&target).await.unwrap_or(false) {
        return Err(rename_error("destination already exists".to_string()));
    }

    tokio::fs::rename(artifact, &target)
        .await
        .map_err(|e| rename_error(e.to_string()))?;

    Ok(CapturedPhoto::new(file_name, directory, stamp.captured_at()))
}
