use std::sync::Arc;

use pulse_core::events::FeedEvent;

use crate::registry::ConnectionRegistry;

/// Best-effort fan-out of one event to every live connection.
///
/// Business handlers call [`broadcast`](Broadcaster::broadcast) after their
/// own state change is committed and move on; delivery failures are absorbed
/// here by pruning the dead connection, never surfaced to the caller.
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Push `event` to every live connection. Serializes once, then does a
    /// non-blocking write per connection; a connection whose write fails is
    /// removed inline while the remaining deliveries proceed. Zero live
    /// connections is a no-op.
    pub fn broadcast(&self, event: FeedEvent) {
        let frame = match serde_json::to_string(&event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, event_type = event.event_type(), "unserializable event dropped");
                return;
            }
        };

        let mut delivered = 0usize;
        let mut pruned = 0usize;
        for (id, entry) in self.registry.snapshot() {
            if entry.try_send(frame.clone()) {
                delivered += 1;
            } else {
                self.registry.remove(&id);
                pruned += 1;
            }
        }

        tracing::debug!(
            event_type = event.event_type(),
            delivered,
            pruned,
            "broadcast complete"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pulse_core::events::{BusinessPayload, WireEvent};
    use pulse_core::ids::{ConnectionId, UserId};
    use tokio::sync::mpsc;

    fn verification(registration_id: &str) -> FeedEvent {
        FeedEvent::Verification(BusinessPayload {
            registration_id: registration_id.into(),
            full_name: "Jane Doe".into(),
            status: "present".into(),
            timestamp: Utc::now(),
            verified_by: None,
            location: None,
        })
    }

    fn register(registry: &ConnectionRegistry) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(8);
        registry.register(id.clone(), UserId::from_raw("user_a"), tx);
        (id, rx)
    }

    #[tokio::test]
    async fn broadcast_with_zero_connections_is_a_noop() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));

        broadcaster.broadcast(verification("R1"));
        assert_eq!(registry.size(), 0);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_live_connection_once() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let (_, mut rx1) = register(&registry);
        let (_, mut rx2) = register(&registry);

        broadcaster.broadcast(verification("R1"));

        for rx in [&mut rx1, &mut rx2] {
            let frame = rx.try_recv().unwrap();
            let wire = WireEvent::parse(&frame).unwrap();
            assert_eq!(wire.event_type, "verification");
            assert_eq!(wire.data["registrationId"], "R1");
            assert_eq!(wire.data["fullName"], "Jane Doe");
            assert!(rx.try_recv().is_err(), "second copy delivered");
        }
    }

    #[tokio::test]
    async fn late_registrants_miss_earlier_broadcasts() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let (_, mut early) = register(&registry);

        broadcaster.broadcast(verification("R1"));
        let (_, mut late) = register(&registry);

        assert!(early.try_recv().is_ok());
        assert!(late.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_write_prunes_only_that_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let (dead_id, dead_rx) = register(&registry);
        let (live_id, mut live_rx) = register(&registry);
        drop(dead_rx);

        broadcaster.broadcast(verification("R1"));

        assert_eq!(registry.size(), 1);
        assert!(!registry.contains(&dead_id));
        assert!(registry.contains(&live_id));
        let frame = live_rx.try_recv().unwrap();
        assert_eq!(WireEvent::parse(&frame).unwrap().event_type, "verification");
    }

    #[tokio::test]
    async fn per_connection_order_matches_broadcast_order() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        let (_, mut rx) = register(&registry);

        broadcaster.broadcast(verification("R1"));
        broadcaster.broadcast(verification("R2"));
        broadcaster.broadcast(verification("R3"));

        for expected in ["R1", "R2", "R3"] {
            let frame = rx.try_recv().unwrap();
            assert_eq!(WireEvent::parse(&frame).unwrap().data["registrationId"], expected);
        }
    }
}
