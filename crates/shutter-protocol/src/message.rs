//! Protocol message types for daemon communication.
//!
//! Messages are JSON objects, one per line, tagged by `type`. The
//! live-view events keep the names browsers already know (`start-stream`,
//! `liveStream`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shutter_core::{CameraError, CapturedPhoto, StreamEvent};

use crate::version::ProtocolVersion;

/// Message types that can be sent by clients to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Client handshake/connection request
    Connect {
        /// Client identifier (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Subscribe to the live view
    #[serde(rename = "start-stream")]
    StartStream,

    /// Leave the live view without disconnecting
    #[serde(rename = "stop-stream")]
    StopStream,

    /// Take one full-resolution photo
    TakePhoto,

    /// List photos already in the photo directory
    ListPhotos,

    /// Ping to check connection
    Ping {
        /// Sequence number for matching pong response
        seq: u64,
    },

    /// Client disconnecting gracefully
    Disconnect,
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Creates a new client message with current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    pub fn start_stream() -> Self {
        Self::new(MessageType::StartStream)
    }

    pub fn stop_stream() -> Self {
        Self::new(MessageType::StopStream)
    }

    pub fn take_photo() -> Self {
        Self::new(MessageType::TakePhoto)
    }

    pub fn list_photos() -> Self {
        Self::new(MessageType::ListPhotos)
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

/// A photo as clients see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoPayload {
    /// Path relative to the served root (`photos/<name>`)
    pub src: String,

    /// When the photo was taken (RFC 3339)
    pub captured_timestamp: DateTime<Utc>,
}

impl From<&CapturedPhoto> for PhotoPayload {
    fn from(photo: &CapturedPhoto) -> Self {
        Self {
            src: photo.src(),
            captured_timestamp: photo.captured_at,
        }
    }
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Connection accepted
    Connected {
        /// Daemon's protocol version
        protocol_version: ProtocolVersion,
        /// Assigned client ID
        client_id: String,
    },

    /// Connection rejected (version mismatch, etc.)
    Rejected {
        /// Reason for rejection
        reason: String,
        /// Daemon's protocol version (for client to upgrade)
        protocol_version: ProtocolVersion,
    },

    /// A new live-view frame is on disk
    #[serde(rename = "liveStream")]
    LiveStream {
        #[serde(rename = "imagePathWithCacheBuster")]
        image_path_with_cache_buster: String,
    },

    /// The camera stopped producing frames; send `start-stream` to retry
    #[serde(rename = "streamInterrupted")]
    StreamInterrupted { reason: String },

    /// Result of `take_photo`
    Photo {
        #[serde(flatten)]
        photo: PhotoPayload,
    },

    /// Result of `list_photos`
    PhotoList { photos: Vec<PhotoPayload> },

    /// Pong response to ping
    Pong {
        /// Sequence number from ping
        seq: u64,
    },

    /// Error response
    Error {
        /// Error message
        message: String,
        /// Error code (optional)
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl DaemonMessage {
    /// Creates a connected response.
    pub fn connected(client_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
        }
    }

    /// Creates a rejected response.
    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn photo(photo: &CapturedPhoto) -> Self {
        Self::Photo {
            photo: PhotoPayload::from(photo),
        }
    }

    pub fn photo_list(photos: &[CapturedPhoto]) -> Self {
        Self::PhotoList {
            photos: photos.iter().map(PhotoPayload::from).collect(),
        }
    }

    /// Creates a pong response.
    pub fn pong(seq: u64) -> Self {
        Self::Pong { seq }
    }

    /// Creates an error response.
    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    /// Creates an error response with code.
    pub fn error_with_code(message: &str, code: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code.to_string()),
        }
    }

    /// Reports a camera failure with its stable code.
    pub fn camera_error(err: &CameraError) -> Self {
        Self::error_with_code(&err.to_string(), err.code())
    }
}

impl From<StreamEvent> for DaemonMessage {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Frame {
                image_path_with_cache_buster,
            } => Self::LiveStream {
                image_path_with_cache_buster,
            },
            StreamEvent::Interrupted { reason } => Self::StreamInterrupted { reason },
        }
    }
}
