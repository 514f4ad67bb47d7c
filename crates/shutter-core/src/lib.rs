//! shutter core - shared types for camera capture and live view
//!
//! This crate provides the domain types shared between the daemon
//! (shutterd), the wire protocol and the `shutter` client.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod config;
pub mod error;
pub mod event;
pub mod photo;

// Re-exports for convenience
pub use config::{
    CameraCommand, CameraConfig, CameraParams, CaptureRequest, PhotoConfig, ServerConfig,
    ShutterConfig, StreamConfig, DEFAULT_SOCKET_PATH,
};
pub use error::{CameraError, ConfigError};
pub use event::{ReadinessEvent, StreamEvent};
pub use photo::{
    is_temporary_artifact, ArtifactNaming, CapturedPhoto, PhotoStamp, PHOTOS_URL_PREFIX,
};
