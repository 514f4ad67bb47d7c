//! Photo endpoint: capture on demand and list what has been taken.
//!
//! In production every request runs a [`CaptureSession`]. Otherwise no
//! camera is touched: after a short delay the configured example image is
//! returned, which keeps the client flow usable on a dev machine.
//!
//! Captures are serialised; a second request waits for the first to
//! resolve rather than racing it for the same output file.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use shutter_core::{
    is_temporary_artifact, CameraError, CaptureRequest, CapturedPhoto, ShutterConfig,
};

use crate::capture::CaptureSession;
use crate::process::Launcher;

/// How photos are produced.
enum CaptureMode {
    Camera {
        binary: String,
        poll_interval: Duration,
        launcher: Arc<dyn Launcher>,
    },
    Example {
        file_name: String,
        delay: Duration,
    },
}

pub struct PhotoService {
    mode: CaptureMode,
    request: CaptureRequest,
    in_flight: Mutex<()>,
}

impl PhotoService {
    pub fn from_config(config: &ShutterConfig, launcher: Arc<dyn Launcher>) -> Self {
        let mode = if config.production {
            CaptureMode::Camera {
                binary: config.camera.binary.clone(),
                poll_interval: config.poll_interval(),
                launcher,
            }
        } else {
            CaptureMode::Example {
                file_name: config.photo.example_file.clone(),
                delay: config.photo.example_delay(),
            }
        };

        Self {
            mode,
            request: config.capture_request(),
            in_flight: Mutex::new(()),
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self.mode, CaptureMode::Camera { .. })
    }

    /// Takes one photo, waiting for any capture already in progress.
    ///
    /// # Errors
    ///
    /// Whatever [`CaptureSession::run`] fails with; never fails outside
    /// production.
    pub async fn take_photo(&self) -> Result<CapturedPhoto, CameraError> {
        let _guard = self.in_flight.lock().await;

        match &self.mode {
            CaptureMode::Camera {
                binary,
                poll_interval,
                launcher,
            } => {
                let mut session = CaptureSession::new(
                    self.request.clone(),
                    binary.clone(),
                    *poll_interval,
                    Arc::clone(launcher),
                );
                session.run().await
            }
            CaptureMode::Example { file_name, delay } => {
                debug!(delay = ?delay, "Simulating capture");
                tokio::time::sleep(*delay).await;
                Ok(CapturedPhoto::new(
                    file_name.clone(),
                    &self.request.directory,
                    Utc::now(),
                ))
            }
        }
    }

    /// Lists the photo directory.
    pub async fn list_photos(&self) -> Result<Vec<CapturedPhoto>, CameraError> {
        list_photos(&self.request.directory).await
    }
}

/// Every finished photo in `dir`, ordered by file name.
///
/// The capture time is the file's creation time, or its modification time
/// on filesystems that do not record one.
///
/// # Errors
///
/// `CameraError::DirectoryRead` if the directory or any entry cannot be
/// read. No partial listing is returned.
pub async fn list_photos(dir: &Path) -> Result<Vec<CapturedPhoto>, CameraError> {
    let read_error = |e: std::io::Error| CameraError::directory_read(dir, e);

    let mut entries = tokio::fs::read_dir(dir).await.map_err(read_error)?;
    let mut photos = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(read_error)? {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if is_temporary_artifact(&file_name) {
            continue;
        }

        let metadata = entry.metadata().await.map_err(read_error)?;
        if !metadata.is_file() {
            continue;
        }

        let taken = metadata
            .created()
            .or_else(|_| metadata.modified())
            .map_err(read_error)?;

        photos.push(CapturedPhoto::new(
            file_name,
            dir,
            DateTime::<Utc>::from(taken),
        ));
    }

    photos.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    info!(dir = %dir.display(), count = photos.len(), "Listed photos");
    Ok(photos)
}
