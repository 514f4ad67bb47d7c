//! Unix socket server for the shutter daemon.
//!
//! The server:
//! - Listens on a Unix socket for client connections
//! - Spawns a ConnectionHandler for each client
//! - Supports graceful shutdown via CancellationToken, waiting for every
//!   connection to release its live-view subscription
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   DaemonServer  │
//! │                 │
//! │  UnixListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│  StreamHandle   │ start-stream / stop-stream
//! │   (per client)  │     └─────────────────┘
//! │                 │     ┌─────────────────┐
//! │                 │────▶│  PhotoService   │ take_photo / list_photos
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Server errors are logged and allow continued operation

mod connection;

pub use connection::{ConnectionError, ConnectionHandler, MAX_MESSAGE_SIZE};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::gallery::PhotoService;
use crate::stream::StreamHandle;

/// Unix socket server for the shutter daemon.
pub struct DaemonServer {
    socket_path: PathBuf,
    stream: StreamHandle,
    photos: Arc<PhotoService>,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for generating client IDs
    connection_counter: AtomicU64,

    connections: TaskTracker,
}

impl DaemonServer {
    pub fn new(
        socket_path: impl Into<PathBuf>,
        stream: StreamHandle,
        photos: Arc<PhotoService>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            socket_path: socket_path.into(),
            stream,
            photos,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            connections: TaskTracker::new(),
        }
    }

    /// Returns the socket path.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Number of connections currently being served.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Runs the server.
    ///
    /// Listens for connections until the cancellation token is triggered.
    /// This method does not return until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let setup_error = |e: std::io::Error| ServerError::SocketSetup {
            path: self.socket_path.clone(),
            error: e.to_string(),
        };

        // Remove a socket left by a previous run
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(setup_error)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(setup_error)?;
            }
        }

        let listener = UnixListener::bind(&self.socket_path).map_err(setup_error)?;

        info!(
            socket = %self.socket_path.display(),
            production = self.photos.is_production(),
            "Daemon server listening"
        );

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    /// Handles a new client connection by spawning a handler task.
    fn handle_connection(&self, stream: tokio::net::UnixStream, connection_number: u64) {
        let (reader, writer) = stream.into_split();
        let handler = ConnectionHandler::new(
            reader,
            writer,
            self.stream.clone(),
            Arc::clone(&self.photos),
            self.cancel_token.child_token(),
            connection_number,
        );

        self.connections.spawn(async move {
            if let Some(id) = handler.run().await {
                debug!(client_id = %id, "Connection task finished");
            }
        });
    }

    /// Waits for connections to wind down, stops the camera, and removes
    /// the socket file.
    async fn cleanup(&self) {
        self.connections.close();
        info!(
            connections = self.connection_count(),
            "Waiting for connections to close"
        );
        self.connections.wait().await;

        if self.stream.stop_streaming().await {
            info!("Live view stopped on shutdown");
        }

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(
                    socket = %self.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            }
        }

        info!("Server cleanup complete");
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to setup socket at {path}: {error}")]
    SocketSetup { path: PathBuf, error: String },

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}
