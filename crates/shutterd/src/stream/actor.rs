//! Stream actor - owns the live-view camera and its subscribers.
//!
//! The StreamActor is the only code that starts or stops the live-view
//! process, so at most one exists at a time. Subscribers are counted
//! through the [`SubscriberRegistry`]; the camera runs while the count is
//! non-zero.
//!
//! Each start opens a new *generation*. Frame and exit notifications from
//! forwarder tasks carry the generation that spawned them, and anything
//! from an older generation is dropped. This is what keeps a frame that was
//! already in flight during a teardown from reaching anyone.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Camera failures are returned to the subscriber that triggered them
//! - Channel send failures are logged but don't panic

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use shutter_core::{CameraError, ReadinessEvent, StreamEvent};

use super::commands::{StreamCommand, StreamError, StreamSnapshot, SubscribeOutcome, SubscriberId};
use super::subscribers::{BroadcastOutcome, SubscriberRegistry};
use super::StreamSettings;
use crate::process::{ExitNotifier, Launcher, ProcessExit, ProcessHandle};
use crate::watcher::{FileReadinessWatcher, WatchTarget};

/// The running camera and the watcher following its output.
struct LiveCamera {
    process: ProcessHandle,
    watcher: FileReadinessWatcher,
}

/// The stream actor.
///
/// Processes commands sequentially in a single task; all state lives here.
pub struct StreamActor {
    receiver: mpsc::Receiver<StreamCommand>,

    /// Used by forwarder tasks to post back. Weak, so that dropping every
    /// [`StreamHandle`](super::StreamHandle) still stops the actor.
    self_sender: mpsc::WeakSender<StreamCommand>,

    settings: StreamSettings,
    launcher: Arc<dyn Launcher>,
    subscribers: SubscriberRegistry,

    /// `Some` while watching
    live: Option<LiveCamera>,
    generation: u64,

    /// Last cache-busting token handed out
    last_token: u64,

    stats: StreamSnapshot,
}

impl StreamActor {
    pub fn new(
        receiver: mpsc::Receiver<StreamCommand>,
        self_sender: mpsc::WeakSender<StreamCommand>,
        settings: StreamSettings,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        let last_token = u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default();
        Self {
            receiver,
            self_sender,
            settings,
            launcher,
            subscribers: SubscriberRegistry::new(),
            live: None,
            generation: 0,
            last_token,
            stats: StreamSnapshot::default(),
        }
    }

    /// Runs the actor event loop until every handle is dropped.
    pub async fn run(mut self) {
        info!(frame = %self.settings.frame_path.display(), "Stream actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        self.teardown();
        info!(
            starts = self.stats.starts,
            teardowns = self.stats.teardowns,
            "Stream actor stopped"
        );
    }

    fn handle_command(&mut self, cmd: StreamCommand) {
        match cmd {
            StreamCommand::Subscribe {
                id,
                sink,
                respond_to,
            } => {
                let result = self.handle_subscribe(id, sink);
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            StreamCommand::Unsubscribe { id, respond_to } => {
                let _ = respond_to.send(self.handle_unsubscribe(&id));
            }
            StreamCommand::StopStreaming { respond_to } => {
                let _ = respond_to.send(self.handle_stop_streaming());
            }
            StreamCommand::FrameReady { generation, event } => {
                self.handle_frame(generation, event);
            }
            StreamCommand::ProcessExited { generation, exit } => {
                self.handle_process_exit(generation, exit);
            }
            StreamCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    fn handle_subscribe(
        &mut self,
        id: SubscriberId,
        sink: mpsc::Sender<StreamEvent>,
    ) -> Result<SubscribeOutcome, StreamError> {
        let added = self.subscribers.register(id.clone(), sink)?;

        if self.live.is_some() {
            // A viewer joining a running stream gets a frame right away
            // instead of waiting for the next write.
            let event = self.next_frame();
            self.subscribers.send_to(&id, event);
            debug!(
                subscriber = %id,
                subscribers = self.subscribers.len(),
                "Subscriber joined running stream"
            );
            return Ok(SubscribeOutcome::Joined);
        }

        match self.start() {
            Ok(()) => {
                info!(
                    subscriber = %id,
                    generation = self.generation,
                    "Live view started"
                );
                Ok(SubscribeOutcome::Started)
            }
            Err(e) => {
                warn!(subscriber = %id, error = %e, "Live view failed to start");
                if added {
                    self.subscribers.unregister(&id);
                }
                Err(e.into())
            }
        }
    }

    fn handle_unsubscribe(&mut self, id: &SubscriberId) -> bool {
        let removed = self.subscribers.unregister(id);
        if removed {
            debug!(
                subscriber = %id,
                remaining = self.subscribers.len(),
                "Subscriber left"
            );
            if self.subscribers.is_empty() {
                self.teardown();
            }
        }
        removed
    }

    fn handle_stop_streaming(&mut self) -> bool {
        if !self.subscribers.is_empty() {
            debug!(
                subscribers = self.subscribers.len(),
                "Stop requested while viewers remain, ignoring"
            );
            return false;
        }
        self.teardown()
    }

    fn handle_frame(&mut self, generation: u64, event: ReadinessEvent) {
        if !self.is_current(generation) {
            trace!(
                generation,
                current = self.generation,
                version = event.version,
                "Dropping frame from stale generation"
            );
            return;
        }

        let frame = self.next_frame();
        let outcome = self.subscribers.broadcast(&frame);
        self.stats.frames += 1;
        trace!(
            version = event.version,
            delivered = outcome.delivered,
            dropped = outcome.dropped,
            "Frame broadcast"
        );
        self.after_broadcast(&outcome);
    }

    fn handle_process_exit(&mut self, generation: u64, exit: ProcessExit) {
        if !self.is_current(generation) {
            trace!(generation, exit = %exit, "Ignoring exit from stale generation");
            return;
        }

        warn!(
            exit = %exit,
            subscribers = self.subscribers.len(),
            "Live-view camera exited unexpectedly"
        );

        if let Some(live) = self.live.take() {
            live.watcher.cancel();
        }
        self.generation += 1;
        self.stats.interruptions += 1;

        let event = StreamEvent::interrupted(format!("camera process {exit}"));
        let outcome = self.subscribers.broadcast(&event);
        self.after_broadcast(&outcome);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawns the watcher, then the camera, and wires both back to the actor.
    ///
    /// The watcher goes first so its baseline predates any frame the new
    /// process writes.
    fn start(&mut self) -> Result<(), CameraError> {
        let (watcher, events) = FileReadinessWatcher::spawn(
            WatchTarget::File(self.settings.frame_path.clone()),
            self.settings.poll_interval,
        );
        let process = self.launcher.launch(&self.settings.command)?;

        self.generation += 1;
        self.stats.starts += 1;
        self.spawn_forwarders(self.generation, events, process.exit_notifier());
        self.live = Some(LiveCamera { process, watcher });
        Ok(())
    }

    /// Stops the camera and watcher. Returns `false` if nothing was running.
    fn teardown(&mut self) -> bool {
        let Some(live) = self.live.take() else {
            return false;
        };

        live.watcher.cancel();
        live.process.kill();
        self.generation += 1;
        self.stats.teardowns += 1;

        info!(
            pid = ?live.process.pid(),
            generation = self.generation,
            "Live view stopped"
        );
        true
    }

    fn spawn_forwarders(
        &self,
        generation: u64,
        mut events: mpsc::Receiver<ReadinessEvent>,
        exit: ExitNotifier,
    ) {
        let sender = self.self_sender.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(tx) = sender.upgrade() else { break };
                if tx
                    .send(StreamCommand::FrameReady { generation, event })
                    .await
                    .is_err()
                {
                    break;
                }
            }
            trace!(generation, "Frame forwarder finished");
        });

        let sender = self.self_sender.clone();
        tokio::spawn(async move {
            let exit = exit.wait().await;
            if let Some(tx) = sender.upgrade() {
                let _ = tx
                    .send(StreamCommand::ProcessExited { generation, exit })
                    .await;
            }
        });
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn is_current(&self, generation: u64) -> bool {
        self.live.is_some() && generation == self.generation
    }

    fn next_frame(&mut self) -> StreamEvent {
        self.last_token += 1;
        StreamEvent::frame(&self.settings.public_path, self.last_token)
    }

    /// Runs teardown if pruning emptied the subscriber set.
    fn after_broadcast(&mut self, outcome: &BroadcastOutcome) {
        if !outcome.pruned.is_empty() && self.subscribers.is_empty() {
            debug!("Last subscriber disconnected");
            self.teardown();
        }
    }

    fn snapshot(&self) -> StreamSnapshot {
        StreamSnapshot {
            watching: self.live.is_some(),
            subscriber_count: self.subscribers.len(),
            pid: self.live.as_ref().and_then(|live| live.process.pid()),
            generation: self.generation,
            ..self.stats.clone()
        }
    }
}
