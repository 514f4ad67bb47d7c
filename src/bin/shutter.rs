//! shutter - command-line client for the shutter daemon
//!
//! # Usage
//!
//! ```text
//! shutter photo              # take a photo, print its path and time
//! shutter list               # list photos already taken
//! shutter watch              # print live-view frames until Ctrl+C
//! shutter watch --frames 10  # stop after ten frames
//! shutter ping               # check the daemon is answering
//! ```
//!
//! The socket is taken from `--socket`, then `SHUTTER_SOCKET`, then the
//! daemon's default.

use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::timeout;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use shutter_core::config::SOCKET_ENV;
use shutter_core::DEFAULT_SOCKET_PATH;
use shutter_protocol::{ClientMessage, DaemonMessage, PhotoPayload};

/// How long to wait for the daemon to answer a request.
const REPLY_TIMEOUT: Duration = Duration::from_secs(60);

/// shutter - take photos and watch the live view
#[derive(Parser, Debug)]
#[command(name = "shutter", version, about)]
struct Args {
    /// Daemon socket path
    #[arg(short, long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Take a photo
    Photo,
    /// List photos already taken
    List,
    /// Follow the live view
    Watch {
        /// Stop after this many frames
        #[arg(short, long)]
        frames: Option<u64>,
    },
    /// Check that the daemon responds
    Ping,
}

/// One handshaken connection to the daemon.
struct DaemonConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl DaemonConnection {
    async fn connect(socket: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket).await.with_context(|| {
            format!(
                "Cannot reach shutterd at {} (is it running? try 'shutterd start')",
                socket.display()
            )
        })?;
        let (reader, writer) = stream.into_split();
        let mut conn = Self {
            reader: BufReader::new(reader),
            writer,
        };

        conn.send(&ClientMessage::connect(None)).await?;
        match conn.recv().await? {
            DaemonMessage::Connected { client_id, .. } => {
                debug!(client_id = %client_id, "Connected to daemon");
                Ok(conn)
            }
            DaemonMessage::Rejected { reason, .. } => bail!("Daemon rejected connection: {reason}"),
            other => bail!("Unexpected handshake reply: {other:?}"),
        }
    }

    async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        let mut json = serde_json::to_string(msg).context("Failed to encode message")?;
        json.push('\n');
        self.writer
            .write_all(json.as_bytes())
            .await
            .context("Failed to write to daemon")?;
        self.writer.flush().await.context("Failed to write to daemon")
    }

    async fn recv(&mut self) -> Result<DaemonMessage> {
        let mut line = String::new();
        let read = self
            .reader
            .read_line(&mut line)
            .await
            .context("Failed to read from daemon")?;
        if read == 0 {
            bail!("Daemon closed the connection");
        }
        serde_json::from_str(&line).with_context(|| format!("Malformed daemon message: {line}"))
    }

    /// Waits for a reply, skipping unrelated stream events.
    async fn reply(&mut self) -> Result<DaemonMessage> {
        loop {
            let msg = timeout(REPLY_TIMEOUT, self.recv())
                .await
                .context("Timed out waiting for the daemon")??;
            match msg {
                DaemonMessage::LiveStream { .. } => continue,
                DaemonMessage::Error { message, code } => {
                    bail!("{message} ({})", code.as_deref().unwrap_or("error"))
                }
                other => return Ok(other),
            }
        }
    }

    async fn close(mut self) {
        let _ = self.send(&ClientMessage::disconnect()).await;
    }
}

fn socket_path(arg: Option<PathBuf>) -> PathBuf {
    arg.or_else(|| std::env::var_os(SOCKET_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
}

fn print_photo(photo: &PhotoPayload) {
    println!(
        "{}  {}",
        photo
            .captured_timestamp
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S"),
        photo.src
    );
}

async fn take_photo(conn: &mut DaemonConnection) -> Result<()> {
    conn.send(&ClientMessage::take_photo()).await?;
    match conn.reply().await? {
        DaemonMessage::Photo { photo } => {
            print_photo(&photo);
            Ok(())
        }
        other => bail!("Unexpected reply: {other:?}"),
    }
}

async fn list_photos(conn: &mut DaemonConnection) -> Result<()> {
    conn.send(&ClientMessage::list_photos()).await?;
    match conn.reply().await? {
        DaemonMessage::PhotoList { photos } => {
            if photos.is_empty() {
                println!("No photos yet.");
            }
            for photo in &photos {
                print_photo(photo);
            }
            Ok(())
        }
        other => bail!("Unexpected reply: {other:?}"),
    }
}

async fn watch(conn: &mut DaemonConnection, limit: Option<u64>) -> Result<()> {
    conn.send(&ClientMessage::start_stream()).await?;
    let mut seen = 0u64;

    loop {
        let msg = tokio::select! {
            msg = conn.recv() => msg?,
            _ = tokio::signal::ctrl_c() => break,
        };

        match msg {
            DaemonMessage::LiveStream {
                image_path_with_cache_buster,
            } => {
                println!("{image_path_with_cache_buster}");
                seen += 1;
                if limit.is_some_and(|max| seen >= max) {
                    break;
                }
            }
            DaemonMessage::StreamInterrupted { reason } => {
                bail!("Live view interrupted: {reason}");
            }
            DaemonMessage::Error { message, .. } => bail!("{message}"),
            other => debug!(message = ?other, "Ignoring message"),
        }
    }

    conn.send(&ClientMessage::stop_stream()).await
}

async fn ping(conn: &mut DaemonConnection) -> Result<()> {
    conn.send(&ClientMessage::ping(1)).await?;
    match conn.reply().await? {
        DaemonMessage::Pong { .. } => {
            println!("shutterd is up");
            Ok(())
        }
        other => bail!("Unexpected reply: {other:?}"),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    if let Err(e) = run(Args::parse()).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let socket = socket_path(args.socket);
    let mut conn = DaemonConnection::connect(&socket).await?;

    let result = match args.command {
        Command::Photo => take_photo(&mut conn).await,
        Command::List => list_photos(&mut conn).await,
        Command::Watch { frames } => watch(&mut conn, frames).await,
        Command::Ping => ping(&mut conn).await,
    };

    conn.close().await;
    result
}
