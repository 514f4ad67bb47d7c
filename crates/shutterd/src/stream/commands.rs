//! Stream actor commands, errors, and snapshots.
//!
//! This module defines the message types for communicating with the `StreamActor`:
//! - `StreamCommand`: Commands sent to the actor, by clients and by its own
//!   forwarder tasks
//! - `StreamError`: Errors returned to subscribers
//! - `StreamSnapshot`: Read-only view of the actor state

use std::fmt;

use shutter_core::{CameraError, ReadinessEvent, StreamEvent};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::process::ProcessExit;

// ============================================================================
// Subscriber identity
// ============================================================================

/// Identifies one live-view observer (one client connection).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubscriberId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ============================================================================
// Stream Commands
// ============================================================================

/// Whether a subscribe call started the camera or joined a running one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// The camera process was spawned for this subscriber.
    Started,
    /// A stream was already running; the subscriber got a synthetic frame.
    Joined,
}

/// Commands sent to the stream actor.
///
/// `FrameReady` and `ProcessExited` come from the actor's own forwarder
/// tasks and carry the generation that spawned them; the actor drops any
/// whose generation is no longer current.
#[derive(Debug)]
pub enum StreamCommand {
    /// Register a subscriber, starting the camera if nothing is running.
    ///
    /// # Errors
    /// - `StreamError::SubscriberLimit` if at maximum capacity
    /// - `StreamError::Camera` if the camera could not be started
    Subscribe {
        id: SubscriberId,
        sink: mpsc::Sender<StreamEvent>,
        respond_to: oneshot::Sender<Result<SubscribeOutcome, StreamError>>,
    },

    /// Remove a subscriber. Responds with whether it was registered.
    Unsubscribe {
        id: SubscriberId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Tear down if nobody is subscribed. Responds with whether a
    /// teardown happened.
    StopStreaming { respond_to: oneshot::Sender<bool> },

    /// A new frame landed on disk.
    FrameReady {
        generation: u64,
        event: ReadinessEvent,
    },

    /// The camera process ended.
    ProcessExited { generation: u64, exit: ProcessExit },

    /// Read the current state.
    Snapshot {
        respond_to: oneshot::Sender<StreamSnapshot>,
    },
}

// ============================================================================
// Stream Errors
// ============================================================================

/// Errors that can occur during stream operations.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Too many observers are connected.
    #[error("too many live-view subscribers (max: {max})")]
    SubscriberLimit { max: usize },

    /// The camera could not be started.
    #[error(transparent)]
    Camera(#[from] CameraError),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

impl StreamError {
    /// Stable code for the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::SubscriberLimit { .. } => "subscriber_limit",
            Self::Camera(e) => e.code(),
            Self::ChannelClosed => "internal",
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Point-in-time view of the stream actor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamSnapshot {
    /// A camera process and watcher are active
    pub watching: bool,
    /// Registered subscribers
    pub subscriber_count: usize,
    /// Pid of the live-view process, if running
    pub pid: Option<u32>,
    /// Current generation; bumped on every start and teardown
    pub generation: u64,
    /// Camera processes spawned so far
    pub starts: u64,
    /// Teardowns caused by the last subscriber leaving
    pub teardowns: u64,
    /// Streams that ended because the camera exited
    pub interruptions: u64,
    /// Frame events broadcast
    pub frames: u64,
}
