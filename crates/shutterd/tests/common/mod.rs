//! Fake cameras for integration tests.
//!
//! Each launcher runs a real `sh` process through the `Launcher` seam, so
//! kill, exit, and readiness paths behave as they would with the real tool.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shutter_core::{CameraCommand, CameraError};
use shutterd::process::{Launcher, ProcessHandle};
use shutterd::stream::StreamSettings;

pub const POLL: Duration = Duration::from_millis(20);

fn sh(script: String, args: Vec<String>) -> CameraCommand {
    let mut argv = vec!["-c".to_string(), script, "sh".to_string()];
    argv.extend(args);
    CameraCommand::new("sh", argv)
}

/// Value following `flag` in the camera arguments.
fn flag_value(command: &CameraCommand, flag: &str) -> Option<String> {
    command
        .args
        .iter()
        .position(|a| a == flag)
        .and_then(|i| command.args.get(i + 1))
        .cloned()
}

/// Behaves like the camera tool, writing to whatever `-o` says.
#[derive(Debug, Clone, Copy)]
pub enum FakeCamera {
    /// Rewrites the output every 50 ms until killed.
    Timelapse,
    /// Writes a temp file, renames it into place, then idles.
    Still,
    /// Only ever writes `<output>~`.
    TempOnly,
    /// Exits immediately with an error.
    Broken,
}

impl FakeCamera {
    fn script(self) -> &'static str {
        match self {
            Self::Timelapse => {
                r#"i=0; while true; do i=$((i+1)); echo "frame $i" > "$1"; sleep 0.05; done"#
            }
            Self::Still => r#"printf jpeg > "$1~"; mv "$1~" "$1"; exec sleep 30"#,
            Self::TempOnly => r#"while true; do date > "$1~"; sleep 0.05; done"#,
            Self::Broken => "exit 70",
        }
    }
}

/// Launches a [`FakeCamera`] and counts how often it was started.
pub struct CountingLauncher {
    camera: FakeCamera,
    launches: AtomicUsize,
}

impl CountingLauncher {
    pub fn new(camera: FakeCamera) -> Arc<Self> {
        Arc::new(Self {
            camera,
            launches: AtomicUsize::new(0),
        })
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl Launcher for CountingLauncher {
    fn launch(&self, command: &CameraCommand) -> Result<ProcessHandle, CameraError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let output = flag_value(command, "-o").unwrap_or_default();
        ProcessHandle::spawn(&sh(self.camera.script().to_string(), vec![output]))
    }
}

/// Live-view settings writing frames into `dir`.
pub fn stream_settings(dir: &Path) -> StreamSettings {
    let frame_path = dir.join("image_stream.jpg");
    StreamSettings {
        command: CameraCommand::new(
            "raspistill",
            vec!["-o".to_string(), frame_path.display().to_string()],
        ),
        frame_path,
        public_path: "image_stream.jpg".to_string(),
        poll_interval: POLL,
    }
}
