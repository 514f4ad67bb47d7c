//! Detects when the camera tool has finished writing an image.
//!
//! The camera writes incrementally: a temp file (`name~`) first, then a
//! rename onto the final name. The watcher polls metadata on an interval
//! and turns changes into [`ReadinessEvent`]s:
//!
//! - Everything present when the watcher starts is the baseline and is
//!   never reported.
//! - Temp artifacts are skipped; only finished names count.
//! - An entry whose length and mtime did not change is not reported again.
//!
//! Cancellation is checked before every send, so once [`FileReadinessWatcher::cancel`]
//! returns no new event leaves the task.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use shutter_core::{is_temporary_artifact, ArtifactNaming, ReadinessEvent};

/// Buffered events between the poller and its consumer.
const EVENT_BUFFER: usize = 16;

/// What to watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchTarget {
    /// A single path the tool overwrites on every frame.
    File(PathBuf),

    /// A directory in which artifacts named per `naming` appear.
    Directory { dir: PathBuf, naming: ArtifactNaming },
}

/// Size and mtime of a file; a change in either means new content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    len: u64,
    modified: Option<SystemTime>,
}

impl Fingerprint {
    fn of(metadata: &std::fs::Metadata) -> Self {
        Self {
            len: metadata.len(),
            modified: metadata.modified().ok(),
        }
    }
}

/// A running watcher. Cancelled on drop.
#[derive(Debug)]
pub struct FileReadinessWatcher {
    cancel: CancellationToken,
}

impl FileReadinessWatcher {
    /// Takes the baseline snapshot, then starts polling `target` every
    /// `poll_interval`.
    ///
    /// The baseline is read before this returns, so a process started
    /// afterwards cannot slip its first artifact into it.
    pub fn spawn(
        target: WatchTarget,
        poll_interval: Duration,
    ) -> (Self, mpsc::Receiver<ReadinessEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();

        let mut poller = Poller {
            target,
            seen: HashMap::new(),
        };
        poller.seen = poller.baseline();

        debug!(
            target = ?poller.target,
            baseline = poller.seen.len(),
            "File watcher started"
        );

        tokio::spawn(poller.run(poll_interval, tx, cancel.clone()));

        (Self { cancel }, rx)
    }

    /// Stops the watcher. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for FileReadinessWatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Poller {
    target: WatchTarget,
    seen: HashMap<PathBuf, Fingerprint>,
}

impl Poller {
    async fn run(
        mut self,
        poll_interval: Duration,
        tx: mpsc::Sender<ReadinessEvent>,
        cancel: CancellationToken,
    ) {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut version = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            for path in self.poll().await {
                version += 1;
                let event = ReadinessEvent::new(path, version);
                trace!(path = %event.source_path.display(), version, "Artifact ready");

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("File watcher cancelled with an event in flight, dropping it");
                        return;
                    }
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            debug!("File watcher consumer gone, stopping");
                            return;
                        }
                    }
                }
            }
        }

        debug!(target = ?self.target, "File watcher stopped");
    }

    /// Current state of the target, read synchronously.
    fn baseline(&self) -> HashMap<PathBuf, Fingerprint> {
        let mut snapshot = HashMap::new();
        match &self.target {
            WatchTarget::File(path) => {
                if let Ok(metadata) = std::fs::metadata(path) {
                    snapshot.insert(path.clone(), Fingerprint::of(&metadata));
                }
            }
            WatchTarget::Directory { dir, naming } => match std::fs::read_dir(dir) {
                Ok(entries) => {
                    for entry in entries.flatten() {
                        let name = entry.file_name();
                        let Some(name) = name.to_str() else { continue };
                        if !naming.matches(name) {
                            continue;
                        }
                        if let Ok(metadata) = entry.metadata() {
                            snapshot.insert(entry.path(), Fingerprint::of(&metadata));
                        }
                    }
                }
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "Cannot read watched directory");
                }
            },
        }
        snapshot
    }

    /// Returns paths whose content is new since the last poll, in name order.
    async fn poll(&mut self) -> Vec<PathBuf> {
        let current = match &self.target {
            WatchTarget::File(path) => scan_file(path).await,
            WatchTarget::Directory { dir, naming } => scan_directory(dir, naming).await,
        };

        let mut changed: Vec<PathBuf> = current
            .iter()
            .filter(|(path, fingerprint)| self.seen.get(*path) != Some(*fingerprint))
            .map(|(path, _)| path.clone())
            .collect();
        changed.sort();

        // Vanished entries are forgotten so a later rewrite counts as new.
        self.seen = current;
        changed
    }
}

async fn scan_file(path: &Path) -> HashMap<PathBuf, Fingerprint> {
    let mut found = HashMap::new();
    match tokio::fs::metadata(path).await {
        Ok(metadata) if metadata.is_file() => {
            found.insert(path.to_path_buf(), Fingerprint::of(&metadata));
        }
        Ok(_) => {}
        Err(e) => trace!(path = %path.display(), error = %e, "Watched file not present"),
    }
    found
}

async fn scan_directory(dir: &Path, naming: &ArtifactNaming) -> HashMap<PathBuf, Fingerprint> {
    let mut found = HashMap::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            trace!(dir = %dir.display(), error = %e, "Watched directory not readable");
            return found;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };

        if is_temporary_artifact(name) {
            trace!(name, "Skipping in-progress artifact");
            continue;
        }
        if !naming.matches(name) {
            continue;
        }

        // The tool may rename the entry away between listing and stat.
        if let Ok(metadata) = entry.metadata().await {
            if metadata.is_file() {
                found.insert(entry.path(), Fingerprint::of(&metadata));
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    const POLL: Duration = Duration::from_millis(20);
    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_file_rewrite_emits_event() {
        let dir = tempfile::tempdir().unwrap();
        let frame = dir.path().join("image_stream.jpg");

        let (_watcher, mut rx) =
            FileReadinessWatcher::spawn(WatchTarget::File(frame.clone()), POLL);
        std::fs::write(&frame, b"frame-1").unwrap();

        let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.source_path, frame);
        assert_eq!(event.version, 1);
    }

    #[tokio::test]
    async fn test_baseline_not_reported() {
        let dir = tempfile::tempdir().unwrap();
        let frame = dir.path().join("image_stream.jpg");
        std::fs::write(&frame, b"old frame").unwrap();

        let (_watcher, mut rx) = FileReadinessWatcher::spawn(WatchTarget::File(frame), POLL);
        assert!(timeout(POLL * 5, rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_temp_artifact_ignored_until_renamed() {
        let dir = tempfile::tempdir().unwrap();
        let target = WatchTarget::Directory {
            dir: dir.path().to_path_buf(),
            naming: ArtifactNaming::fixed("_photo.jpg"),
        };
        let (_watcher, mut rx) = FileReadinessWatcher::spawn(target, POLL);

        let temp = dir.path().join("_photo.jpg~");
        std::fs::write(&temp, b"partial").unwrap();
        assert!(timeout(POLL * 5, rx.recv()).await.is_err());

        let done = dir.path().join("_photo.jpg");
        std::fs::rename(&temp, &done).unwrap();
        let event = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.file_name(), Some("_photo.jpg"));
    }

    #[tokio::test]
    async fn test_unrelated_files_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let target = WatchTarget::Directory {
            dir: dir.path().to_path_buf(),
            naming: ArtifactNaming::fixed("_photo.jpg"),
        };
        let (_watcher, mut rx) = FileReadinessWatcher::spawn(target, POLL);

        std::fs::write(dir.path().join("1700000000000.jpg"), b"old photo").unwrap();
        assert!(timeout(POLL * 5, rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_unchanged_file_not_reported_twice() {
        let dir = tempfile::tempdir().unwrap();
        let frame = dir.path().join("frame.jpg");
        let (_watcher, mut rx) =
            FileReadinessWatcher::spawn(WatchTarget::File(frame.clone()), POLL);

        std::fs::write(&frame, b"frame").unwrap();
        timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert!(timeout(POLL * 5, rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_no_events_after_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let frame = dir.path().join("frame.jpg");
        let (watcher, mut rx) = FileReadinessWatcher::spawn(WatchTarget::File(frame.clone()), POLL);

        watcher.cancel();
        assert!(watcher.is_cancelled());
        std::fs::write(&frame, b"late frame").unwrap();

        // The task exits and drops its sender without emitting.
        assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), None);
    }
}
