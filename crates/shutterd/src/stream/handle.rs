//! Client interface for interacting with the StreamActor.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `StreamError::ChannelClosed`

use tokio::sync::{mpsc, oneshot};

use shutter_core::StreamEvent;

use super::commands::{StreamCommand, StreamError, StreamSnapshot, SubscribeOutcome, SubscriberId};

/// Handle for interacting with the stream actor.
///
/// Cheap to clone; one per connection is typical. The actor stops once
/// every handle is dropped.
///
/// # Usage
///
/// ```ignore
/// let (tx, mut rx) = mpsc::channel(32);
/// handle.subscribe(SubscriberId::new("client-1"), tx).await?;
/// while let Some(event) = rx.recv().await {
///     // forward to the viewer
/// }
/// handle.unsubscribe(SubscriberId::new("client-1")).await;
/// ```
#[derive(Clone)]
pub struct StreamHandle {
    sender: mpsc::Sender<StreamCommand>,
}

impl StreamHandle {
    pub fn new(sender: mpsc::Sender<StreamCommand>) -> Self {
        Self { sender }
    }

    /// Registers `sink` as a live-view subscriber, starting the camera if
    /// it is not running.
    ///
    /// Returns once the spawn attempt has been made, not after the first
    /// frame.
    ///
    /// # Errors
    ///
    /// - `StreamError::SubscriberLimit` if too many viewers are connected
    /// - `StreamError::Camera` if the camera could not be started
    /// - `StreamError::ChannelClosed` if the actor has shut down
    pub async fn subscribe(
        &self,
        id: SubscriberId,
        sink: mpsc::Sender<StreamEvent>,
    ) -> Result<SubscribeOutcome, StreamError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(StreamCommand::Subscribe {
                id,
                sink,
                respond_to: tx,
            })
            .await
            .map_err(|_| StreamError::ChannelClosed)?;

        rx.await.map_err(|_| StreamError::ChannelClosed)?
    }

    /// Removes a subscriber; the last one out stops the camera.
    ///
    /// Returns `false` if `id` was not subscribed or the actor is gone.
    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(StreamCommand::Unsubscribe { id, respond_to: tx })
            .await
            .is_err()
        {
            return false;
        }

        rx.await.unwrap_or(false)
    }

    /// Stops the camera if no one is watching. Safe to call repeatedly.
    ///
    /// Returns `true` only when this call tore something down.
    pub async fn stop_streaming(&self) -> bool {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(StreamCommand::StopStreaming { respond_to: tx })
            .await
            .is_err()
        {
            return false;
        }

        rx.await.unwrap_or(false)
    }

    /// Current actor state. Defaults if the actor is gone.
    pub async fn snapshot(&self) -> StreamSnapshot {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(StreamCommand::Snapshot { respond_to: tx })
            .await
            .is_err()
        {
            return StreamSnapshot::default();
        }

        rx.await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_actor_maps_to_errors() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = StreamHandle::new(tx);

        let (sink, _events) = mpsc::channel(1);
        let err = handle.subscribe("a".into(), sink).await.unwrap_err();
        assert!(matches!(err, StreamError::ChannelClosed));
        assert!(!handle.unsubscribe("a".into()).await);
        assert!(!handle.stop_streaming().await);
        assert_eq!(handle.snapshot().await, StreamSnapshot::default());
    }
}
