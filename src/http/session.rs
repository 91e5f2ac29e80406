//! Usage: One-way session notifications for the navigation/login layer.

use tokio::sync::broadcast;

const SESSION_EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A refresh minted a new access credential.
    Refreshed,
    /// Refresh failed; credentials were cleared and the user must log in again.
    Invalidated { reason: String },
    LoggedOut,
}

#[derive(Debug, Clone)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        let receivers = self.tx.receiver_count();
        tracing::debug!(event = ?event, receivers, "session event");
        // No subscriber is a valid state; the event is simply dropped.
        let _ = self.tx.send(event);
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new()
    }
}
