//! shutter protocol - wire format for daemon communication
//!
//! This crate provides the message types exchanged between the daemon and
//! its clients over the Unix socket: the handshake, live-view events,
//! photo requests and their responses.

pub mod message;
pub mod version;

pub use message::{ClientMessage, DaemonMessage, MessageType, PhotoPayload};
pub use version::{ProtocolVersion, VersionError};
