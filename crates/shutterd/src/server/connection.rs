//! Connection handler for individual client connections.
//!
//! Each client connection gets its own `ConnectionHandler` that:
//! - Performs protocol version negotiation
//! - Parses incoming messages
//! - Subscribes to and leaves the live view on the client's behalf
//! - Runs photo captures without blocking the rest of the connection
//!
//! After the handshake a reader task owns the socket's read half and feeds
//! parsed messages into a channel, so the main loop can wait on client
//! input, live-view frames, and finished captures at once.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use shutter_core::StreamEvent;
use shutter_protocol::{ClientMessage, DaemonMessage, MessageType, ProtocolVersion};

use crate::gallery::PhotoService;
use crate::stream::{StreamHandle, SubscriberId};

/// Maximum message size (1 MB)
pub const MAX_MESSAGE_SIZE: usize = 1_048_576;

/// Idle timeout for connections that are not watching the stream (5 minutes)
const READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Write timeout (10 seconds)
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Live-view frames buffered per client before frames are dropped
const EVENT_BUFFER: usize = 32;

type Inbound = mpsc::Receiver<Result<ClientMessage, ConnectionError>>;

/// Connection handler for a single client.
pub struct ConnectionHandler {
    /// Taken by the reader task after the handshake
    reader: Option<BufReader<OwnedReadHalf>>,

    writer: BufWriter<OwnedWriteHalf>,

    stream: StreamHandle,
    photos: Arc<PhotoService>,

    /// Server shutdown
    shutdown: CancellationToken,

    /// Name reported to the client after the handshake; may be shared
    /// by several connections
    client_id: Option<String>,

    /// Live-view key, unique per connection
    subscriber_id: SubscriberId,

    /// Whether this client is subscribed to the live view
    streaming: bool,

    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        stream: StreamHandle,
        photos: Arc<PhotoService>,
        shutdown: CancellationToken,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: Some(BufReader::new(reader)),
            writer: BufWriter::new(writer),
            stream,
            photos,
            shutdown,
            client_id: None,
            subscriber_id: SubscriberId::new(format!("conn-{connection_number}")),
            streaming: false,
            connection_number,
        }
    }

    /// Runs the connection until the client leaves, idles out, or the
    /// server shuts down. A live-view subscription is always released.
    pub async fn run(mut self) -> Option<String> {
        debug!(connection = self.connection_number, "New client connected");

        let Some(mut reader) = self.reader.take() else {
            return None;
        };

        if let Err(e) = self.handle_handshake(&mut reader).await {
            warn!(
                connection = self.connection_number,
                error = %e,
                "Handshake failed"
            );
            return None;
        }
        info!(client_id = ?self.client_id, "Client handshake completed");

        let (inbound_tx, inbound) = mpsc::channel(16);
        let reader_task = spawn_reader(reader, inbound_tx);

        if let Err(e) = self.process_messages(inbound).await {
            debug!(client_id = ?self.client_id, error = %e, "Connection closed");
        }

        reader_task.abort();
        self.leave_stream().await;

        info!(client_id = ?self.client_id, "Client disconnected");
        self.client_id
    }

    /// Expects a `Connect` message and answers `Connected` or `Rejected`.
    async fn handle_handshake(
        &mut self,
        reader: &mut BufReader<OwnedReadHalf>,
    ) -> Result<(), ConnectionError> {
        let msg = match timeout(READ_TIMEOUT, read_message(reader)).await {
            Ok(result) => result?,
            Err(_) => return Err(ConnectionError::Timeout),
        };

        let client_version = msg.protocol_version;
        if let Err(e) = client_version.ensure_compatible() {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );
            self.send_message(DaemonMessage::rejected(&e.to_string()))
                .await?;
            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.message {
            MessageType::Connect { client_id } => {
                let assigned_id = client_id
                    .unwrap_or_else(|| format!("client-{}", self.connection_number));
                self.client_id = Some(assigned_id.clone());
                self.send_message(DaemonMessage::connected(assigned_id))
                    .await
            }
            other => {
                self.send_message(DaemonMessage::error(
                    "Expected Connect message for handshake",
                ))
                .await?;
                Err(ConnectionError::UnexpectedMessage(format!("{other:?}")))
            }
        }
    }

    async fn process_messages(&mut self, mut inbound: Inbound) -> Result<(), ConnectionError> {
        let (events_tx, mut events_rx) = mpsc::channel::<StreamEvent>(EVENT_BUFFER);
        let (replies_tx, mut replies_rx) = mpsc::channel::<DaemonMessage>(4);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!(client_id = ?self.client_id, "Server shutting down, closing connection");
                    return Ok(());
                }

                incoming = inbound.recv() => match incoming {
                    None => {
                        debug!(client_id = ?self.client_id, "Client sent EOF");
                        return Ok(());
                    }
                    Some(Ok(msg)) => {
                        self.handle_message(msg, &events_tx, &replies_tx).await?;
                    }
                    Some(Err(ConnectionError::ParseError(reason))) => {
                        debug!(
                            client_id = ?self.client_id,
                            reason = %reason,
                            "Unparseable message"
                        );
                        self.send_message(DaemonMessage::error_with_code(
                            &format!("Parse error: {reason}"),
                            "parse_error",
                        ))
                        .await?;
                    }
                    Some(Err(e)) => return Err(e),
                },

                Some(event) = events_rx.recv() => {
                    self.send_message(DaemonMessage::from(event)).await?;
                }

                Some(reply) = replies_rx.recv() => {
                    self.send_message(reply).await?;
                }

                _ = sleep(READ_TIMEOUT), if !self.streaming => {
                    debug!(client_id = ?self.client_id, "Connection timed out");
                    return Err(ConnectionError::Timeout);
                }
            }
        }
    }

    /// Handles a single client message.
    async fn handle_message(
        &mut self,
        msg: ClientMessage,
        events_tx: &mpsc::Sender<StreamEvent>,
        replies_tx: &mpsc::Sender<DaemonMessage>,
    ) -> Result<(), ConnectionError> {
        match msg.message {
            MessageType::Connect { .. } => {
                self.send_message(DaemonMessage::error("Already connected"))
                    .await?;
            }

            MessageType::StartStream => {
                let id = self.subscriber_id.clone();
                match self.stream.subscribe(id, events_tx.clone()).await {
                    Ok(outcome) => {
                        self.streaming = true;
                        debug!(
                            client_id = ?self.client_id,
                            subscriber = %self.subscriber_id,
                            outcome = ?outcome,
                            "Client watching live view"
                        );
                    }
                    Err(e) => {
                        self.send_message(DaemonMessage::error_with_code(
                            &e.to_string(),
                            e.code(),
                        ))
                        .await?;
                    }
                }
            }

            MessageType::StopStream => {
                self.leave_stream().await;
            }

            MessageType::TakePhoto => {
                let photos = Arc::clone(&self.photos);
                let replies = replies_tx.clone();
                tokio::spawn(async move {
                    let reply = match photos.take_photo().await {
                        Ok(photo) => DaemonMessage::photo(&photo),
                        Err(e) => DaemonMessage::camera_error(&e),
                    };
                    // The client may have left while the camera was busy.
                    let _ = replies.send(reply).await;
                });
            }

            MessageType::ListPhotos => {
                let reply = match self.photos.list_photos().await {
                    Ok(photos) => DaemonMessage::photo_list(&photos),
                    Err(e) => DaemonMessage::camera_error(&e),
                };
                self.send_message(reply).await?;
            }

            MessageType::Ping { seq } => {
                self.send_message(DaemonMessage::pong(seq)).await?;
            }

            MessageType::Disconnect => {
                debug!(client_id = ?self.client_id, "Client requested disconnect");
                return Err(ConnectionError::Eof);
            }
        }

        Ok(())
    }

    /// Releases this client's live-view subscription, if any.
    async fn leave_stream(&mut self) {
        if !self.streaming {
            return;
        }
        self.streaming = false;
        self.stream.unsubscribe(self.subscriber_id.clone()).await;
    }

    /// Sends a message to the client.
    async fn send_message(&mut self, msg: DaemonMessage) -> Result<(), ConnectionError> {
        let json =
            serde_json::to_string(&msg).map_err(|e| ConnectionError::ParseError(e.to_string()))?;

        let writer = &mut self.writer;
        match timeout(WRITE_TIMEOUT, async {
            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}

/// Forwards parsed messages until EOF or a fatal read error.
fn spawn_reader(
    mut reader: BufReader<OwnedReadHalf>,
    tx: mpsc::Sender<Result<ClientMessage, ConnectionError>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let result = read_message(&mut reader).await;
            let fatal = match &result {
                Ok(_) | Err(ConnectionError::ParseError(_)) => false,
                Err(ConnectionError::Eof) => break,
                Err(_) => true,
            };
            if tx.send(result).await.is_err() || fatal {
                break;
            }
        }
    })
}

/// Reads a single newline-delimited message.
async fn read_message(
    reader: &mut BufReader<OwnedReadHalf>,
) -> Result<ClientMessage, ConnectionError> {
    let mut line = String::new();

    let bytes_read = reader
        .read_line(&mut line)
        .await
        .map_err(|e| ConnectionError::Io(e.to_string()))?;

    if bytes_read == 0 {
        return Err(ConnectionError::Eof);
    }

    if line.len() > MAX_MESSAGE_SIZE {
        return Err(ConnectionError::MessageTooLarge {
            size: line.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let msg: ClientMessage =
        serde_json::from_str(&line).map_err(|e| ConnectionError::ParseError(e.to_string()))?;

    debug!(message = ?msg.message, "Received message");
    Ok(msg)
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}
