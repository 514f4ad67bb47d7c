//! Readiness and stream events.

use std::path::PathBuf;

/// A new, complete image exists at `source_path`.
///
/// `version` increases by one for every event a single watcher emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessEvent {
    /// The finished artifact
    pub source_path: PathBuf,

    /// Per-watcher monotonic counter
    pub version: u64,
}

impl ReadinessEvent {
    pub fn new(source_path: impl Into<PathBuf>, version: u64) -> Self {
        Self {
            source_path: source_path.into(),
            version,
        }
    }

    /// File name of the artifact, if it has a UTF-8 one.
    pub fn file_name(&self) -> Option<&str> {
        self.source_path.file_name().and_then(|n| n.to_str())
    }
}

/// Events pushed to live-view subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A new frame is available.
    Frame {
        /// Frame path plus a query token forcing clients past their cache
        image_path_with_cache_buster: String,
    },

    /// The camera process died; the stream stopped until someone subscribes again.
    Interrupted {
        /// Human-readable cause
        reason: String,
    },
}

impl StreamEvent {
    /// Builds a frame event for `image_path` tagged with `token`.
    pub fn frame(image_path: &str, token: u64) -> Self {
        Self::Frame {
            image_path_with_cache_buster: format!("{image_path}?_t={token}"),
        }
    }

    pub fn interrupted(reason: impl Into<String>) -> Self {
        Self::Interrupted {
            reason: reason.into(),
        }
    }
}
