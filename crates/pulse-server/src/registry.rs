use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use pulse_core::ids::{ConnectionId, UserId};
use tokio::sync::mpsc;

/// One admitted connection as the registry sees it: the owning user, the
/// sending half of the session's outbound channel, and a diagnostic
/// last-heartbeat timestamp. The session owns the receiving half; this entry
/// is a non-owning handle used for fan-out.
pub struct ConnectionEntry {
    user_id: UserId,
    tx: mpsc::Sender<String>,
    last_heartbeat_ms: AtomicI64,
}

impl ConnectionEntry {
    fn new(user_id: UserId, tx: mpsc::Sender<String>) -> Self {
        Self {
            user_id,
            tx,
            last_heartbeat_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    /// Epoch millis of the last successful heartbeat write. Diagnostics only;
    /// liveness is decided by write failures, never by this clock.
    pub fn last_heartbeat_ms(&self) -> i64 {
        self.last_heartbeat_ms.load(Ordering::Relaxed)
    }

    /// Queue a serialized frame without blocking. `false` means the channel
    /// is closed or full — either way the connection is no longer draining
    /// and must be treated as dead by the caller.
    pub fn try_send(&self, frame: String) -> bool {
        self.tx.try_send(frame).is_ok()
    }
}

/// Concurrency-safe map of all currently-live connections.
///
/// Constructed once at server start and dependency-injected into sessions and
/// the broadcaster. Every operation is a short in-memory mutation; no I/O
/// happens under any shard lock.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionEntry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Add a connection. Registering the same id twice overwrites the
    /// metadata rather than duplicating the entry.
    pub fn register(&self, id: ConnectionId, user_id: UserId, tx: mpsc::Sender<String>) {
        self.connections
            .insert(id, Arc::new(ConnectionEntry::new(user_id, tx)));
    }

    /// Remove a connection. Removing an absent id is a no-op — a session and
    /// the broadcaster may both decide a connection is dead.
    pub fn remove(&self, id: &ConnectionId) {
        if self.connections.remove(id).is_some() {
            tracing::debug!(connection_id = %id, remaining = self.size(), "connection removed");
        }
    }

    /// Update the diagnostic heartbeat timestamp. No-op when the connection
    /// was concurrently removed.
    pub fn touch(&self, id: &ConnectionId) {
        if let Some(entry) = self.connections.get(id) {
            entry
                .last_heartbeat_ms
                .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        }
    }

    pub fn size(&self) -> usize {
        self.connections.len()
    }

    /// Best-effort snapshot of the live connections for iteration. Entries
    /// removed after the snapshot was taken simply fail their send.
    pub fn snapshot(&self) -> Vec<(ConnectionId, Arc<ConnectionEntry>)> {
        self.connections
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
