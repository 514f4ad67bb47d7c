//! Shared live view using the Actor pattern.
//!
//! One camera process serves every viewer. The first subscriber starts it,
//! the last one to leave stops it, and every frame the camera writes is
//! pushed to all subscribers with a fresh cache-busting token.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ StreamCommand ┌──────────────┐  StreamEvent  ┌─────────────┐
//! │ StreamHandle │──────────────▶│ StreamActor  │──────────────▶│ Subscribers │
//! └──────────────┘    (mpsc)     └──────────────┘  (per-sink)   └─────────────┘
//!                                   ▲        ▲
//!                      FrameReady   │        │  ProcessExited
//!                 ┌─────────────────┘        └───────────────┐
//!         ┌───────┴────────────┐                    ┌────────┴───────┐
//!         │FileReadinessWatcher│                    │ ProcessHandle  │
//!         └────────────────────┘                    └────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use shutter_core::{CameraCommand, ShutterConfig};

use crate::process::Launcher;

mod actor;
mod commands;
mod handle;
mod subscribers;

pub use actor::StreamActor;
pub use commands::{StreamCommand, StreamError, StreamSnapshot, SubscribeOutcome, SubscriberId};
pub use handle::StreamHandle;
pub use subscribers::{BroadcastOutcome, SubscriberRegistry, MAX_SUBSCRIBERS};

const COMMAND_BUFFER: usize = 100;

/// What the live view runs and where it looks for frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Camera invocation in live-view mode
    pub command: CameraCommand,
    /// File the camera overwrites on every frame
    pub frame_path: PathBuf,
    /// Path handed to clients in front of the cache buster
    pub public_path: String,
    pub poll_interval: Duration,
}

impl StreamSettings {
    pub fn from_config(config: &ShutterConfig) -> Self {
        Self {
            command: config.stream_command(),
            frame_path: config.stream.frame_path(),
            public_path: config.stream.file_name.clone(),
            poll_interval: config.poll_interval(),
        }
    }
}

/// Spawns the stream actor and returns a handle to it.
///
/// Must be called from within a tokio runtime.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use shutter_core::ShutterConfig;
/// use shutterd::process::SystemLauncher;
/// use shutterd::stream::{spawn_stream, StreamSettings};
///
/// #[tokio::main]
/// async fn main() {
///     let config = ShutterConfig::default();
///     let handle = spawn_stream(StreamSettings::from_config(&config), Arc::new(SystemLauncher));
///     let snapshot = handle.snapshot().await;
///     assert!(!snapshot.watching);
/// }
/// ```
pub fn spawn_stream(settings: StreamSettings, launcher: Arc<dyn Launcher>) -> StreamHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = StreamActor::new(cmd_rx, cmd_tx.downgrade(), settings, launcher);
    tokio::spawn(actor.run());

    StreamHandle::new(cmd_tx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let config = ShutterConfig::default();
        let settings = StreamSettings::from_config(&config);
        assert_eq!(settings.public_path, "image_stream.jpg");
        assert_eq!(settings.frame_path, PathBuf::from("stream/image_stream.jpg"));
        assert_eq!(settings.command.program, "raspistill");
        assert!(settings.command.args.contains(&"-tl".to_string()));
    }
}
