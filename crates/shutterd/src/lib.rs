//! shutter daemon - camera orchestration and live-view broadcast server
//!
//! This crate drives an external still-camera tool on behalf of many
//! clients:
//! - `process` - Spawning, killing, and supervising the camera process
//! - `watcher` - Polling the filesystem for finished images
//! - `capture` - One-shot photo capture with a bounded wait
//! - `stream` - Shared live view, started and stopped by subscriber count
//! - `gallery` - Photo endpoint and historical listing
//! - `server` - Unix socket server for client connections
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      shutterd daemon                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  DaemonServer   │────▶│     StreamActor             │   │
//! │  │ (Unix Socket)   │     │  (one live-view process)    │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │                   │
//! │           │ take_photo                  │ frames            │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  PhotoService   │     │   per-subscriber channels   │   │
//! │  │ (CaptureSession)│     │   (liveStream events)       │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod capture;
pub mod gallery;
pub mod process;
pub mod server;
pub mod stream;
pub mod watcher;
