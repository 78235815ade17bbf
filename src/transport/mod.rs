//! Transport module - byte channels to a remote controller.
//!
//! Provides abstraction over:
//! - TCP sockets (controller on Wi-Fi, or peers accepted by the server)
//! - BLE write/notify characteristic pairs (feature `ble`)
//!
//! A transport is opened once. Opening returns a stream of
//! [`TransportEvent`]s: inbound bytes as they arrive, then exactly one
//! [`TransportEvent::Closed`] when the channel ends for any reason.

#[cfg(feature = "ble")]
pub mod ble;
mod tcp;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::device::Device;
use crate::error::Result;

pub use tcp::{TcpConnector, TcpTransport};

/// Boxed future returned by transport operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capacity of the inbound event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Receiving side of a transport's event stream.
pub type TransportEvents = mpsc::Receiver<TransportEvent>;

/// Something that happened on an open transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Bytes received from the peer.
    Data(Bytes),
    /// The channel ended. Sent once; nothing follows it.
    Closed(CloseReason),
}

/// Why a transport closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer ended the connection.
    PeerClosed,
    /// This side called `close`.
    Local,
    /// The link failed.
    Error(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerClosed => f.write_str("closed by peer"),
            Self::Local => f.write_str("closed locally"),
            Self::Error(e) => write!(f, "link error: {e}"),
        }
    }
}

/// A duplex byte channel to one peer.
///
/// Implementations issue writes in call order and never reorder them.
pub trait Transport: Send + 'static {
    /// Address of the peer, for logs and errors.
    fn peer(&self) -> &str;

    /// Open the channel and start delivering inbound events.
    fn open(&mut self) -> BoxFuture<'_, Result<TransportEvents>>;

    /// Write bytes to the peer. Fails with `TransportClosed` once closed.
    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    /// Close the channel. Calling it again is a no-op.
    fn close(&mut self) -> BoxFuture<'_, ()>;
}

/// Discovers devices and builds transports for them.
pub trait Connector: Send + Sync + 'static {
    /// Transport produced for a chosen device.
    type Transport: Transport;

    /// List devices visible within `timeout`.
    fn scan(&self, timeout: Duration) -> BoxFuture<'_, Result<Vec<Device>>>;

    /// Build an unopened transport for `device`.
    fn transport(&self, device: &Device) -> Result<Self::Transport>;
}

/// Sends the single `Closed` event of a transport.
///
/// Shared between the reader pump and `close`, whichever notices the end
/// first.
#[derive(Debug, Clone)]
pub struct CloseNotifier {
    tx: mpsc::Sender<TransportEvent>,
    fired: Arc<AtomicBool>,
}

impl CloseNotifier {
    /// Wrap the sending side of an event channel.
    pub fn new(tx: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            tx,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Forward inbound bytes. Returns `false` once the receiver is gone.
    pub async fn data(&self, bytes: Bytes) -> bool {
        !self.is_closed() && self.tx.send(TransportEvent::Data(bytes)).await.is_ok()
    }

    /// Deliver `Closed`, waiting for room in the channel.
    pub async fn closed(&self, reason: CloseReason) {
        if !self.fired.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(TransportEvent::Closed(reason)).await;
        }
    }

    /// Deliver `Closed` without waiting.
    ///
    /// If the channel is full, a task on the current runtime delivers it once
    /// the receiver makes room. It is lost only if the receiver is dropped
    /// first, or when called outside a runtime.
    pub fn closed_now(&self, reason: CloseReason) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(TrySendError::Full(event)) = self.tx.try_send(TransportEvent::Closed(reason)) {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    let tx = self.tx.clone();
                    runtime.spawn(async move {
                        let _ = tx.send(event).await;
                    });
                }
                Err(_) => tracing::warn!("event channel full outside a runtime, close event lost"),
            }
        }
    }

    /// Whether `Closed` has already been sent.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// Create an event channel and its close notifier.
pub fn event_channel() -> (CloseNotifier, TransportEvents) {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    (CloseNotifier::new(tx), rx)
}
