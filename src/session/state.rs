//! Session lifecycle state machine.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::error::{LinkError, Result};

/// Connection state of a session.
///
/// ```text
/// Idle -> Discovering -> Connecting -> Ready -> Degraded
///   |          |             |           |         |
///   +----------+-------------+-----------+---------+--> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    /// Nothing attempted yet.
    Idle,
    /// Scanning for a device on the allow-list.
    Discovering,
    /// Opening the transport to the chosen device.
    Connecting,
    /// Open; inbound messages are dispatched and commands accepted.
    Ready,
    /// Open but unhealthy; commands are rejected with `NotConnected`.
    Degraded,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// Whether the state machine allows moving from `self` to `to`.
    ///
    /// `Closed -> Closed` is allowed and is a no-op.
    pub fn can_transition_to(self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Idle, Discovering)
                | (Discovering, Connecting)
                | (Connecting, Ready)
                | (Ready, Degraded)
                | (_, Closed)
        )
    }

    /// Whether the session has ended.
    #[inline]
    pub fn is_closed(self) -> bool {
        self == SessionState::Closed
    }

    /// Lowercase name, as logged.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Degraded => "degraded",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, observable session state.
///
/// All state changes go through [`StateCell::transition`], which rejects moves
/// the state machine does not allow. Clones share the same state.
#[derive(Debug, Clone)]
pub(crate) struct StateCell {
    tx: Arc<watch::Sender<SessionState>>,
}

impl StateCell {
    /// A fresh session in `Idle`.
    pub fn new() -> Self {
        Self::starting_at(SessionState::Idle)
    }

    /// A session entering the machine at `state`.
    ///
    /// Accepted server peers start at `Connecting`: accepting is their
    /// discovery.
    pub fn starting_at(state: SessionState) -> Self {
        let (tx, _) = watch::channel(state);
        Self { tx: Arc::new(tx) }
    }

    /// Current state.
    #[inline]
    pub fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    /// Watch for state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Move to `to`, returning the previous state.
    pub fn transition(&self, to: SessionState) -> Result<SessionState> {
        let mut outcome = Ok(to);

        self.tx.send_if_modified(|current| {
            let from = *current;
            if !from.can_transition_to(to) {
                outcome = Err(LinkError::InvalidTransition { from, to });
                return false;
            }
            outcome = Ok(from);
            if from == to {
                return false;
            }
            *current = to;
            true
        });

        if let Ok(from) = outcome {
            if from != to {
                tracing::info!(from = %from, to = %to, "session state changed");
            }
        }
        outcome
    }

    /// Move to `Closed` from wherever the session is.
    pub fn close(&self) {
        // Every state may close.
        let _ = self.transition(SessionState::Closed);
    }

    /// Move `Ready -> Degraded`; no-op from any other state.
    pub fn degrade(&self) -> bool {
        self.get() == SessionState::Ready && self.transition(SessionState::Degraded).is_ok()
    }

    /// Resolve once the session reaches `Closed`.
    pub async fn closed(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|s| s.is_closed()).await;
    }
}
