//! Live-view observers and fan-out.
//!
//! Owned by the stream actor; never shared. Delivery uses `try_send` so a
//! slow viewer cannot hold up the others: a full sink loses that one frame,
//! a closed sink is dropped from the set.

use std::collections::HashMap;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace};

use shutter_core::StreamEvent;

use super::commands::{StreamError, SubscriberId};

/// Maximum number of simultaneous live-view subscribers.
pub const MAX_SUBSCRIBERS: usize = 64;

/// What happened during one [`SubscriberRegistry::broadcast`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    /// Subscribers whose sink was full; they miss this event only
    pub dropped: usize,
    /// Subscribers removed because their sink was closed
    pub pruned: Vec<SubscriberId>,
}

#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    sinks: HashMap<SubscriberId, mpsc::Sender<StreamEvent>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscriber. Returns `false` if `id` was already registered,
    /// in which case its sink is replaced.
    ///
    /// # Errors
    ///
    /// `StreamError::SubscriberLimit` when full.
    pub fn register(
        &mut self,
        id: SubscriberId,
        sink: mpsc::Sender<StreamEvent>,
    ) -> Result<bool, StreamError> {
        if let Some(existing) = self.sinks.get_mut(&id) {
            *existing = sink;
            return Ok(false);
        }
        if self.sinks.len() >= MAX_SUBSCRIBERS {
            return Err(StreamError::SubscriberLimit {
                max: MAX_SUBSCRIBERS,
            });
        }
        self.sinks.insert(id, sink);
        Ok(true)
    }

    pub fn unregister(&mut self, id: &SubscriberId) -> bool {
        self.sinks.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Sends to one subscriber. A closed sink unregisters it.
    pub fn send_to(&mut self, id: &SubscriberId, event: StreamEvent) -> bool {
        let Some(sink) = self.sinks.get(id) else {
            return false;
        };
        match sink.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!(subscriber = %id, "Subscriber sink full, event dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber = %id, "Subscriber sink closed, removing");
                self.sinks.remove(id);
                false
            }
        }
    }

    /// Sends `event` to every subscriber.
    pub fn broadcast(&mut self, event: &StreamEvent) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();

        for (id, sink) in &self.sinks {
            match sink.try_send(event.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    trace!(subscriber = %id, "Subscriber lagging, event dropped");
                    outcome.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => outcome.pruned.push(id.clone()),
            }
        }

        for id in &outcome.pruned {
            debug!(subscriber = %id, "Subscriber gone, removing");
            self.sinks.remove(id);
        }

        outcome
    }
}
