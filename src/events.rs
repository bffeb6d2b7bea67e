//! Store event bus
//!
//! Broadcast channel observers subscribe to. Discrete events announce what
//! happened; the current state itself is read from the store's snapshot
//! watch, so every observer sees a consistent batch, never a half-applied
//! update.

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::model::ContainerAction;

/// Events published by the store.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// Observable state changed; read the snapshot for the new values
    StateChanged,
    /// A lifecycle action failed; store state is untouched
    ActionFailed {
        host_id: Option<Uuid>,
        container_id: String,
        action: ContainerAction,
        error: String,
    },
    /// A refresh failure passed the failure gate
    ConnectionFailed {
        host_id: Option<Uuid>,
        error: String,
    },
    /// The store switched to a different host
    HostChanged(Uuid),
}

/// Broadcast fan-out for [`StoreEvent`].
///
/// Subscribers that fall behind lose the oldest events (lagged), which is
/// acceptable: the snapshot watch always carries the latest state.
pub struct EventBus {
    sender: broadcast::Sender<StoreEvent>,
}

const EVENT_CAPACITY: usize = 256;

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.sender.subscribe()
    }

    /// Publish to all subscribers; dropped silently when nobody listens.
    pub fn publish(&self, event: StoreEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}
