//! Registry of connected peers.
//!
//! Entries live in a map keyed by [`ConnectionId`] behind a `std::sync::Mutex`.
//! The lock is held only to insert, remove, or copy the map; broadcasts write
//! to a snapshot with the lock released.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use bytes::Bytes;
use serde::Serialize;

use crate::session::{SessionHandle, SessionState};

/// Unique id of a registered peer. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A registered session.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// The peer's session.
    pub session: SessionHandle,
    /// When the peer was registered.
    pub registered_at: SystemTime,
}

/// Point-in-time description of a peer, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    /// Registry id.
    pub id: ConnectionId,
    /// Peer address.
    pub peer: String,
    /// Session state when listed.
    pub state: SessionState,
    /// When the peer was registered.
    pub registered_at: SystemTime,
}

#[derive(Default)]
struct Inner {
    entries: Mutex<BTreeMap<ConnectionId, RegistryEntry>>,
    next_id: AtomicU64,
}

/// Concurrent set of peer sessions with snapshot broadcast.
///
/// Clones share the same registry.
#[derive(Clone, Default)]
pub struct ClientRegistry {
    inner: Arc<Inner>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<ConnectionId, RegistryEntry>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a session and return its id.
    pub fn register(&self, session: SessionHandle) -> ConnectionId {
        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        tracing::debug!(connection_id = %id, peer = %session.peer(), "peer registered");
        self.entries().insert(
            id,
            RegistryEntry {
                session,
                registered_at: SystemTime::now(),
            },
        );
        id
    }

    /// Remove a session. Returns it if it was registered.
    pub fn unregister(&self, id: ConnectionId) -> Option<SessionHandle> {
        let removed = self.entries().remove(&id).map(|e| e.session);
        if removed.is_some() {
            tracing::debug!(connection_id = %id, "peer unregistered");
        }
        removed
    }

    /// Look up a registered session.
    pub fn get(&self, id: ConnectionId) -> Option<RegistryEntry> {
        self.entries().get(&id).cloned()
    }

    /// Number of registered peers.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Check if no peers are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// List registered peers in registration order.
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.entries()
            .iter()
            .map(|(id, entry)| PeerInfo {
                id: *id,
                peer: entry.session.peer().to_string(),
                state: entry.session.state(),
                registered_at: entry.registered_at,
            })
            .collect()
    }

    fn snapshot(&self) -> Vec<(ConnectionId, SessionHandle)> {
        self.entries()
            .iter()
            .map(|(id, entry)| (*id, entry.session.clone()))
            .collect()
    }

    /// Write `data` to every registered peer.
    ///
    /// Peers are written one after another in registration order. A peer
    /// whose write fails is logged, unregistered and disconnected after the
    /// pass; the others still receive the data. Peers registered during the
    /// pass are not included. Returns the number of peers attempted.
    pub async fn broadcast(&self, data: impl Into<Bytes>) -> usize {
        let data = data.into();
        let snapshot = self.snapshot();
        let mut failed = Vec::new();

        for (id, session) in &snapshot {
            if let Err(e) = session.send_raw(data.clone()).await {
                tracing::warn!(connection_id = %id, peer = %session.peer(), "broadcast failed: {e}");
                failed.push(*id);
            }
        }

        for id in failed {
            if let Some(session) = self.unregister(id) {
                session.disconnect().await;
            }
        }
        snapshot.len()
    }

    /// Unregister and disconnect every peer.
    pub async fn disconnect_all(&self) {
        let drained = std::mem::take(&mut *self.entries());
        for (id, entry) in drained {
            tracing::debug!(connection_id = %id, "disconnecting peer");
            entry.session.disconnect().await;
        }
    }
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("peers", &self.len())
            .finish()
    }
}
