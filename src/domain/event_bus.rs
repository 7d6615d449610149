//! Broadcast channel for session-addressed observer updates.
//!
//! [`EventBus`] wraps a [`tokio::sync::broadcast`] channel. Workers
//! publish one [`SessionNotice`] per subscribed session after a
//! non-empty evaluation, and every WebSocket connection subscribes and
//! filters notices by its own session id.

use tokio::sync::broadcast;

use super::protocol::ObserverUpdate;

/// An observer update addressed to one client session.
#[derive(Debug, Clone)]
pub struct SessionNotice {
    /// Target session identifier.
    pub session_id: String,
    /// The update to deliver.
    pub update: ObserverUpdate,
}

/// Broadcast bus for [`SessionNotice`]s.
///
/// Backed by a `tokio::broadcast` channel with a configurable capacity
/// (default 10 000). When the ring buffer is full, the oldest notices
/// are dropped for lagging receivers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionNotice>,
}

impl EventBus {
    /// Creates a new `EventBus` with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes a notice to all subscribers.
    ///
    /// Returns the number of receivers that received the notice.
    /// If there are no active receivers, the notice is silently dropped.
    pub fn publish(&self, notice: SessionNotice) -> usize {
        self.sender.send(notice).unwrap_or(0)
    }

    /// Creates a new receiver that will receive all future notices.
    ///
    /// Each WebSocket connection should call this once on connect.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotice> {
        self.sender.subscribe()
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::request::ObserverId;

    fn notice(session_id: &str) -> SessionNotice {
        SessionNotice {
            session_id: session_id.to_string(),
            update: ObserverUpdate {
                observer: ObserverId::from_string("a".repeat(64)),
                primary_key: "id".to_string(),
                added: vec![],
                changed: vec![],
                removed: vec![],
            },
        }
    }

    #[test]
    fn publish_without_receivers_returns_zero() {
        let bus = EventBus::new(100);
        assert_eq!(bus.publish(notice("sess-1")), 0);
    }

    #[tokio::test]
    async fn subscriber_receives_notice() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();

        bus.publish(notice("sess-1"));

        let received = rx.recv().await;
        let Ok(received) = received else {
            panic!("expected to receive notice");
        };
        assert_eq!(received.session_id, "sess-1");
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_notice() {
        let bus = EventBus::new(100);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let count = bus.publish(notice("sess-1"));
        assert_eq!(count, 2);

        let Ok(n1) = rx1.recv().await else {
            panic!("rx1 failed");
        };
        let Ok(n2) = rx2.recv().await else {
            panic!("rx2 failed");
        };
        assert_eq!(n1.session_id, n2.session_id);
    }

    #[test]
    fn receiver_count_tracks_subscribers() {
        let bus = EventBus::new(100);
        assert_eq!(bus.receiver_count(), 0);

        let rx1 = bus.subscribe();
        assert_eq!(bus.receiver_count(), 1);

        let _rx2 = bus.subscribe();
        assert_eq!(bus.receiver_count(), 2);

        drop(rx1);
        assert_eq!(bus.receiver_count(), 1);
    }
}
