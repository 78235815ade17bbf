//! Dispatch module - fan-out of inbound messages to subscribers.
//!
//! Provides:
//! - [`NotificationDispatcher`] - ordered, panic-isolated delivery
//! - [`redeliver`] - adapter that re-posts each message onto another
//!   execution context
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use motorlink::dispatch::NotificationDispatcher;
//! use motorlink::protocol::Message;
//!
//! let dispatcher = NotificationDispatcher::new();
//! let id = dispatcher.subscribe(|msg: &Message| {
//!     if let Some(angle) = msg.angle() {
//!         println!("motor at {angle}");
//!     }
//! });
//!
//! dispatcher.dispatch(&Message::new("angle: 12.5 deg", Arc::from("demo")));
//! assert!(dispatcher.unsubscribe(id));
//! ```

mod redeliver;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use tokio::sync::mpsc;

use crate::protocol::Message;

pub use redeliver::{redeliver, DeliveryTarget, Job, JobQueue};

/// Callback invoked for each inbound message.
pub type Subscriber = Arc<dyn Fn(&Message) + Send + Sync>;

/// Handle returned by [`NotificationDispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Default)]
struct Subscribers {
    entries: RwLock<Vec<(SubscriptionId, Subscriber)>>,
    next_id: AtomicU64,
}

/// Delivers each message to every subscriber, in subscription order.
///
/// Dispatch runs on the caller's context. The subscriber list is copied
/// before any callback runs, so callbacks may subscribe or unsubscribe
/// without deadlocking; such changes apply from the next message. A panicking
/// subscriber is logged and skipped. Delivery is at most once.
///
/// Clones share the same subscriber list.
#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    inner: Arc<Subscribers>,
}

impl NotificationDispatcher {
    /// Create a dispatcher with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self
            .inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(sid, _)| *sid != id);
        entries.len() != before
    }

    /// Forward every message into an unbounded channel.
    ///
    /// The subscription removes itself on the first message after the
    /// receiver is dropped.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let weak = Arc::downgrade(&self.inner);
        let slot: Arc<OnceLock<SubscriptionId>> = Arc::default();
        let own = slot.clone();

        let id = self.subscribe(move |msg: &Message| {
            if tx.send(msg.clone()).is_err() {
                if let (Some(inner), Some(id)) = (weak.upgrade(), own.get()) {
                    NotificationDispatcher { inner }.unsubscribe(*id);
                }
            }
        });
        let _ = slot.set(id);
        (id, rx)
    }

    /// Deliver `message` to every current subscriber.
    ///
    /// Returns the number of subscribers that completed without panicking.
    pub fn dispatch(&self, message: &Message) -> usize {
        let snapshot: Vec<(SubscriptionId, Subscriber)> = self
            .inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut delivered = 0;
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(message))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    tracing::warn!(
                        peer = %message.peer,
                        subscription = id.0,
                        "subscriber panicked: {reason}"
                    );
                }
            }
        }
        delivered
    }

    /// Number of subscribers.
    pub fn len(&self) -> usize {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if there are no subscribers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("subscribers", &self.len())
            .finish()
    }
}
