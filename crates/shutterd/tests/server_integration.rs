//! Integration tests for the Unix socket server.
//!
//! These run a complete `DaemonServer` over a temp socket with a fake
//! camera behind it, covering the handshake, photo requests, and the
//! live-view subscription lifecycle as clients connect and leave.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use shutter_core::ShutterConfig;
use shutter_protocol::{ClientMessage, DaemonMessage, MessageType, ProtocolVersion};
use shutterd::gallery::PhotoService;
use shutterd::server::DaemonServer;
use shutterd::stream::{spawn_stream, StreamHandle, StreamSnapshot};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

use common::{stream_settings, CountingLauncher, FakeCamera};

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for server socket to appear
const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between socket existence checks
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Upper bound on any single reply
const RECV_TIMEOUT: Duration = Duration::from_secs(3);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test server context that manages server lifecycle and cleanup.
struct TestServer {
    socket_path: PathBuf,
    cancel_token: CancellationToken,
    stream: StreamHandle,
    launcher: Arc<CountingLauncher>,
    _temp_dir: TempDir, // Keep alive for RAII cleanup
}

impl TestServer {
    /// Spawns a server in example mode with a timelapse camera for live view.
    async fn spawn() -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("test.sock");
        let photo_dir = temp_dir.path().join("photos");
        std::fs::create_dir(&photo_dir).expect("create photo dir");

        let mut config = ShutterConfig::default();
        config.photo.directory = photo_dir;
        config.photo.example_delay_ms = 20;

        let launcher = CountingLauncher::new(FakeCamera::Timelapse);
        let stream = spawn_stream(stream_settings(temp_dir.path()), launcher.clone());
        let photos = Arc::new(PhotoService::from_config(&config, launcher.clone()));
        let cancel_token = CancellationToken::new();

        let server = DaemonServer::new(
            socket_path.clone(),
            stream.clone(),
            photos,
            cancel_token.clone(),
        );

        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let start = Instant::now();
        while start.elapsed() < SOCKET_WAIT_TIMEOUT {
            if socket_path.exists() {
                break;
            }
            sleep(SOCKET_POLL_INTERVAL).await;
        }

        assert!(
            socket_path.exists(),
            "Server socket did not appear within {SOCKET_WAIT_TIMEOUT:?}"
        );

        Self {
            socket_path,
            cancel_token,
            stream,
            launcher,
            _temp_dir: temp_dir,
        }
    }

    async fn connect(&self) -> TestClient {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to server");
        TestClient::new(stream)
    }

    /// Polls the stream actor until `check` holds.
    async fn wait_for_stream(&self, check: impl Fn(&StreamSnapshot) -> bool) -> StreamSnapshot {
        let deadline = Instant::now() + RECV_TIMEOUT;
        loop {
            let snapshot = self.stream.snapshot().await;
            if check(&snapshot) || Instant::now() >= deadline {
                return snapshot;
            }
            sleep(SOCKET_POLL_INTERVAL).await;
        }
    }

    /// Shuts down the server and waits for the socket to go away.
    async fn shutdown(self) {
        self.cancel_token.cancel();
        let start = Instant::now();
        while self.socket_path.exists() && start.elapsed() < RECV_TIMEOUT {
            sleep(SOCKET_POLL_INTERVAL).await;
        }
    }
}

/// Test client connection with protocol helpers.
struct TestClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn send(&mut self, msg: ClientMessage) {
        let json = serde_json::to_string(&msg).unwrap();
        self.send_raw(&json).await;
    }

    async fn recv(&mut self) -> DaemonMessage {
        let mut line = String::new();
        timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("reply in time")
            .unwrap();
        serde_json::from_str(&line).unwrap()
    }

    /// Next message that is not a live-view frame.
    async fn recv_reply(&mut self) -> DaemonMessage {
        loop {
            match self.recv().await {
                DaemonMessage::LiveStream { .. } => continue,
                other => return other,
            }
        }
    }

    async fn handshake(&mut self, client_id: Option<String>) -> String {
        self.send(ClientMessage::connect(client_id)).await;
        match self.recv().await {
            DaemonMessage::Connected { client_id, .. } => client_id,
            other => panic!("Expected Connected, got {other:?}"),
        }
    }

    async fn expect_frame(&mut self) -> String {
        match self.recv().await {
            DaemonMessage::LiveStream {
                image_path_with_cache_buster,
            } => image_path_with_cache_buster,
            other => panic!("Expected liveStream, got {other:?}"),
        }
    }
}

// ============================================================================
// Connection Tests
// ============================================================================

#[tokio::test]
async fn test_handshake_success() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client
        .send(ClientMessage::connect(Some("kitchen-tablet".to_string())))
        .await;

    match client.recv().await {
        DaemonMessage::Connected {
            protocol_version,
            client_id,
        } => {
            assert_eq!(protocol_version, ProtocolVersion::CURRENT);
            assert_eq!(client_id, "kitchen-tablet");
        }
        other => panic!("Expected Connected, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_handshake_assigns_client_id() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    let id = client.handshake(None).await;
    assert!(id.starts_with("client-"), "unexpected id {id}");

    server.shutdown().await;
}

#[tokio::test]
async fn test_version_mismatch_rejected() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;

    client
        .send(ClientMessage {
            protocol_version: ProtocolVersion::new(99, 0),
            message: MessageType::Connect { client_id: None },
        })
        .await;

    match client.recv().await {
        DaemonMessage::Rejected {
            protocol_version, ..
        } => assert_eq!(protocol_version, ProtocolVersion::CURRENT),
        other => panic!("Expected Rejected, got {other:?}"),
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_ping_pong() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake(None).await;

    client.send(ClientMessage::ping(42)).await;
    assert_eq!(client.recv().await, DaemonMessage::Pong { seq: 42 });

    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_json_keeps_connection_usable() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake(None).await;

    client.send_raw("{not json").await;
    match client.recv().await {
        DaemonMessage::Error { code, .. } => assert_eq!(code.as_deref(), Some("parse_error")),
        other => panic!("Expected Error, got {other:?}"),
    }

    client.send(ClientMessage::ping(7)).await;
    assert_eq!(client.recv().await, DaemonMessage::Pong { seq: 7 });

    server.shutdown().await;
}

// ============================================================================
// Photo Tests
// ============================================================================

#[tokio::test]
async fn test_take_photo_returns_example_outside_production() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake(None).await;

    client.send(ClientMessage::take_photo()).await;
    match client.recv().await {
        DaemonMessage::Photo { photo } => assert_eq!(photo.src, "photos/example.jpg"),
        other => panic!("Expected Photo, got {other:?}"),
    }

    // Example mode never touches the camera
    assert_eq!(server.launcher.launches(), 0);

    server.shutdown().await;
}

#[tokio::test]
async fn test_list_photos_empty_directory() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake(None).await;

    client.send(ClientMessage::list_photos()).await;
    assert_eq!(
        client.recv().await,
        DaemonMessage::PhotoList { photos: vec![] }
    );

    server.shutdown().await;
}

// ============================================================================
// Live View Tests
// ============================================================================

#[tokio::test]
async fn test_start_stream_delivers_frames() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake(None).await;

    client.send(ClientMessage::start_stream()).await;
    let frame = client.expect_frame().await;
    assert!(frame.starts_with("image_stream.jpg?_t="), "{frame}");

    server.shutdown().await;
}

#[tokio::test]
async fn test_ping_answered_while_streaming() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake(None).await;

    client.send(ClientMessage::start_stream()).await;
    client.expect_frame().await;

    client.send(ClientMessage::ping(3)).await;
    assert_eq!(client.recv_reply().await, DaemonMessage::Pong { seq: 3 });

    server.shutdown().await;
}

#[tokio::test]
async fn test_two_viewers_share_camera_until_both_leave() {
    let server = TestServer::spawn().await;

    let mut first = server.connect().await;
    first.handshake(Some("first".to_string())).await;
    let mut second = server.connect().await;
    second.handshake(Some("second".to_string())).await;

    first.send(ClientMessage::start_stream()).await;
    first.expect_frame().await;
    second.send(ClientMessage::start_stream()).await;
    second.expect_frame().await;

    let snapshot = server.stream.snapshot().await;
    assert!(snapshot.watching);
    assert_eq!(snapshot.subscriber_count, 2);
    assert_eq!(server.launcher.launches(), 1);

    // Dropping the socket counts as leaving
    drop(first);
    let snapshot = server.wait_for_stream(|s| s.subscriber_count == 1).await;
    assert!(snapshot.watching);
    second.expect_frame().await;

    // An explicit stop-stream releases the last viewer
    second.send(ClientMessage::stop_stream()).await;
    let snapshot = server.wait_for_stream(|s| !s.watching).await;
    assert_eq!(snapshot.subscriber_count, 0);
    assert_eq!(snapshot.teardowns, 1);
    assert_eq!(server.launcher.launches(), 1);

    // The connection is still open for other requests
    second.send(ClientMessage::ping(1)).await;
    assert_eq!(second.recv_reply().await, DaemonMessage::Pong { seq: 1 });

    server.shutdown().await;
}

#[tokio::test]
async fn test_viewers_sharing_a_client_id_are_counted_separately() {
    let server = TestServer::spawn().await;

    let mut first = server.connect().await;
    assert_eq!(first.handshake(Some("tablet".to_string())).await, "tablet");
    let mut second = server.connect().await;
    assert_eq!(second.handshake(Some("tablet".to_string())).await, "tablet");

    first.send(ClientMessage::start_stream()).await;
    first.expect_frame().await;
    second.send(ClientMessage::start_stream()).await;
    second.expect_frame().await;

    let snapshot = server.stream.snapshot().await;
    assert_eq!(snapshot.subscriber_count, 2);
    assert_eq!(server.launcher.launches(), 1);

    // One of them leaving must not stop the other's view
    drop(first);
    let snapshot = server.wait_for_stream(|s| s.subscriber_count == 1).await;
    assert_eq!(snapshot.subscriber_count, 1);
    assert!(snapshot.watching);
    assert_eq!(snapshot.teardowns, 0);
    second.expect_frame().await;

    drop(second);
    let snapshot = server.wait_for_stream(|s| !s.watching).await;
    assert_eq!(snapshot.subscriber_count, 0);
    assert_eq!(snapshot.teardowns, 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_message_releases_subscription() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake(None).await;

    client.send(ClientMessage::start_stream()).await;
    client.expect_frame().await;

    client.send(ClientMessage::disconnect()).await;
    let snapshot = server.wait_for_stream(|s| !s.watching).await;
    assert_eq!(snapshot.subscriber_count, 0);
    assert_eq!(snapshot.teardowns, 1);

    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_live_view() {
    let server = TestServer::spawn().await;
    let mut client = server.connect().await;
    client.handshake(None).await;

    client.send(ClientMessage::start_stream()).await;
    client.expect_frame().await;

    let stream = server.stream.clone();
    let socket_path = server.socket_path.clone();
    server.shutdown().await;

    assert!(!socket_path.exists());
    assert!(!stream.snapshot().await.watching);
}
