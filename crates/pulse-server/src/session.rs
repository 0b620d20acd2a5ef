use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use pulse_core::config::StreamTiming;
use pulse_core::events::FeedEvent;
use pulse_core::ids::{ConnectionId, UserId};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::registry::ConnectionRegistry;

/// Open a stream session for an already-admitted caller.
///
/// The session is a single owning task: it registers the connection, emits
/// one `connected` event, then writes heartbeats at the configured interval
/// until a write fails, the client drops the stream, or the server cancels
/// the token. Every exit path runs the same idempotent cleanup (registry
/// removal), so a client aborting at the same instant the server shuts the
/// session down cannot double-remove or error.
pub fn open(
    registry: Arc<ConnectionRegistry>,
    timing: StreamTiming,
    queue_depth: usize,
    user_id: UserId,
    shutdown: CancellationToken,
) -> SessionStream {
    let id = ConnectionId::new();
    // mpsc::channel panics on zero capacity; a misconfigured depth degrades
    // to the smallest working queue instead of crashing the server.
    let (tx, rx) = mpsc::channel::<String>(queue_depth.max(1));

    registry.register(id.clone(), user_id.clone(), tx.clone());
    tracing::info!(connection_id = %id, user_id = %user_id, total = registry.size(), "stream session opened");

    // Private welcome event, so the client can confirm end-to-end delivery.
    if let Ok(frame) = serde_json::to_string(&FeedEvent::connected("Live feed connected")) {
        let _ = tx.try_send(frame);
    }

    let cancel = shutdown.child_token();
    let heartbeat = {
        let id = id.clone();
        let registry = Arc::clone(&registry);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(timing.heartbeat_interval);
            ticker.tick().await; // consume the immediate first tick

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Ok(frame) = serde_json::to_string(&FeedEvent::heartbeat()) else {
                            break;
                        };
                        // A closed or full queue means the client is gone or
                        // has stopped draining: the connection is dead. Never
                        // retried on this handle.
                        if tx.try_send(frame).is_err() {
                            tracing::info!(connection_id = %id, "heartbeat write failed, closing session");
                            break;
                        }
                        registry.touch(&id);
                    }
                    _ = cancel.cancelled() => break,
                }
            }

            registry.remove(&id);
        })
    };

    SessionStream {
        frames: ReceiverStream::new(rx),
        _guard: SessionGuard {
            id,
            registry,
            cancel,
            heartbeat,
        },
    }
}

/// Ordered stream of serialized `{type, data}` frames for one session.
///
/// Dropping it (the transport-level abort signal) immediately removes the
/// connection and cancels the heartbeat task.
pub struct SessionStream {
    frames: ReceiverStream<String>,
    _guard: SessionGuard,
}

impl SessionStream {
    pub fn connection_id(&self) -> &ConnectionId {
        &self._guard.id
    }
}

impl Stream for SessionStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.frames).poll_next(cx)
    }
}

struct SessionGuard {
    id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
    cancel: CancellationToken,
    heartbeat: tokio::task::JoinHandle<()>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.registry.remove(&self.id);
        self.heartbeat.abort();
        tracing::info!(connection_id = %self.id, remaining = self.registry.size(), "stream session closed");
    }
}
