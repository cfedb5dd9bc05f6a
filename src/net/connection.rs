//! Connection ids and live-connection tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count open connections so a stopping server can drain them
//! - Carry a connection's slot and stop signal into upgraded sessions

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::net::listener::ConnectionPermit;

/// Relaxed ordering is enough: only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Counts open connections; waiters wake when the count reaches zero.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<watch::Sender<usize>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self {
            active: Arc::new(watch::Sender::new(0)),
        }
    }

    /// Record a new connection. The guard decrements the count on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active.send_modify(|n| *n += 1);
        ConnectionGuard {
            active: Arc::clone(&self.active),
            id: ConnectionId::new(),
        }
    }

    pub fn active_count(&self) -> usize {
        *self.active.borrow()
    }

    /// Resolve once no connection is open.
    pub async fn wait_idle(&self) {
        let mut rx = self.active.subscribe();
        // the sender lives in self, so the channel cannot close here
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Marks one open connection.
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<watch::Sender<usize>>,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.send_modify(|n| *n = n.saturating_sub(1));
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// What an accepted connection holds until it has fully closed.
///
/// Shared by the HTTP connection task and any WebSocket session upgraded
/// from it: the listener slot and the drain count are released only when the
/// last clone drops.
#[derive(Debug, Clone)]
pub struct ConnectionScope {
    slot: Arc<Slot>,
    stop: watch::Receiver<bool>,
}

#[derive(Debug)]
struct Slot {
    guard: ConnectionGuard,
    _permit: Option<ConnectionPermit>,
}

impl ConnectionScope {
    pub fn new(permit: ConnectionPermit, guard: ConnectionGuard, stop: watch::Receiver<bool>) -> Self {
        Self {
            slot: Arc::new(Slot {
                guard,
                _permit: Some(permit),
            }),
            stop,
        }
    }

    /// A scope outside any server: no slot, and the stop signal never fires.
    pub fn detached() -> Self {
        let (_, stop) = watch::channel(false);
        Self {
            slot: Arc::new(Slot {
                guard: ConnectionTracker::new().track(),
                _permit: None,
            }),
            stop,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.slot.guard.id()
    }

    /// Resolve once the owning server starts stopping.
    pub async fn stopped(&self) {
        let mut stop = self.stop.clone();
        if stop.wait_for(|stopping| *stopping).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
