//! TCP transport.
//!
//! Used for controllers reachable over Wi-Fi and for peers accepted by the
//! multi-peer server. A reader pump task forwards socket reads as
//! [`TransportEvent::Data`]; the write half stays with the transport so the
//! owning session writes in call order.
//!
//! # Example
//!
//! ```ignore
//! use motorlink::transport::{TcpTransport, Transport};
//!
//! let mut transport = TcpTransport::connect("192.168.1.40:8888".parse()?);
//! let mut events = transport.open().await?;
//! transport.write(b"s\n").await?;
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

use super::{
    event_channel, BoxFuture, CloseNotifier, CloseReason, Connector, Transport, TransportEvents,
};
use crate::device::Device;
use crate::error::{LinkError, Result};

/// Read buffer size for the pump task.
const READ_BUFFER_SIZE: usize = 4 * 1024;

enum Link {
    /// Not yet opened; dial this address.
    Dial(SocketAddr),
    /// Not yet opened; stream was accepted by a listener.
    Accepted(TcpStream),
    /// Open with a running reader pump.
    Open {
        writer: OwnedWriteHalf,
        reader: JoinHandle<()>,
        notifier: CloseNotifier,
    },
    Closed,
}

/// TCP connection to one peer.
pub struct TcpTransport {
    peer: String,
    link: Link,
}

impl TcpTransport {
    /// Transport that dials `addr` when opened.
    pub fn connect(addr: SocketAddr) -> Self {
        Self {
            peer: addr.to_string(),
            link: Link::Dial(addr),
        }
    }

    /// Transport around a stream returned by `TcpListener::accept`.
    pub fn from_stream(stream: TcpStream, addr: SocketAddr) -> Self {
        Self {
            peer: addr.to_string(),
            link: Link::Accepted(stream),
        }
    }

    async fn open_inner(&mut self) -> Result<TransportEvents> {
        let stream = match std::mem::replace(&mut self.link, Link::Closed) {
            Link::Dial(addr) => {
                TcpStream::connect(addr)
                    .await
                    .map_err(|e| LinkError::ConnectFailed {
                        peer: self.peer.clone(),
                        reason: e.to_string(),
                    })?
            }
            Link::Accepted(stream) => stream,
            open @ Link::Open { .. } => {
                self.link = open;
                return Err(LinkError::ConnectFailed {
                    peer: self.peer.clone(),
                    reason: "already open".to_string(),
                });
            }
            Link::Closed => {
                return Err(LinkError::TransportClosed {
                    peer: self.peer.clone(),
                })
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer = %self.peer, "set_nodelay failed: {e}");
        }

        let (read_half, writer) = stream.into_split();
        let (notifier, events) = event_channel();
        let reader = tokio::spawn(pump_reader(read_half, notifier.clone(), self.peer.clone()));

        self.link = Link::Open {
            writer,
            reader,
            notifier,
        };
        Ok(events)
    }

    async fn write_inner(&mut self, data: &[u8]) -> Result<()> {
        let Link::Open {
            writer, notifier, ..
        } = &mut self.link
        else {
            return Err(LinkError::TransportClosed {
                peer: self.peer.clone(),
            });
        };
        if notifier.is_closed() {
            return Err(LinkError::TransportClosed {
                peer: self.peer.clone(),
            });
        }

        let result: std::io::Result<()> = async {
            writer.write_all(data).await?;
            writer.flush().await
        }
        .await;

        result.map_err(|e| {
            tracing::debug!(peer = %self.peer, "write failed: {e}");
            LinkError::TransportClosed {
                peer: self.peer.clone(),
            }
        })
    }

    async fn close_inner(&mut self) {
        if let Link::Open {
            mut writer,
            reader,
            notifier,
        } = std::mem::replace(&mut self.link, Link::Closed)
        {
            reader.abort();
            let _ = tokio::time::timeout(Duration::from_millis(100), writer.shutdown()).await;
            notifier.closed_now(CloseReason::Local);
            tracing::debug!(peer = %self.peer, "tcp transport closed");
        }
    }
}

impl Transport for TcpTransport {
    fn peer(&self) -> &str {
        &self.peer
    }

    fn open(&mut self) -> BoxFuture<'_, Result<TransportEvents>> {
        Box::pin(self.open_inner())
    }

    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.write_inner(data))
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(self.close_inner())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Link::Open { reader, .. } = &self.link {
            reader.abort();
        }
    }
}

/// Forward reads from `reader` until EOF or error, then report `Closed`.
pub(crate) async fn pump_reader<R>(mut reader: R, notifier: CloseNotifier, peer: String)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!(peer = %peer, "peer closed connection");
                notifier.closed(CloseReason::PeerClosed).await;
                return;
            }
            Ok(n) => {
                if !notifier.data(Bytes::copy_from_slice(&buf[..n])).await {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(peer = %peer, "read error: {e}");
                notifier.closed(CloseReason::Error(e.to_string())).await;
                return;
            }
        }
    }
}

/// Connector over a fixed list of TCP endpoints.
///
/// There is nothing to scan on a socket network, so `scan` returns the
/// configured endpoints as devices.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    endpoints: Vec<Device>,
}

impl TcpConnector {
    /// Create a connector with no endpoints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an endpoint advertised under `name`.
    pub fn endpoint(mut self, name: impl Into<String>, addr: SocketAddr) -> Self {
        self.endpoints
            .push(Device::new(name, addr.to_string(), None));
        self
    }
}

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    fn scan(&self, _timeout: Duration) -> BoxFuture<'_, Result<Vec<Device>>> {
        let endpoints = self.endpoints.clone();
        Box::pin(async move { Ok(endpoints) })
    }

    fn transport(&self, device: &Device) -> Result<TcpTransport> {
        let addr = device.address.parse::<SocketAddr>().map_err(|_| {
            LinkError::InvalidArgument(format!("{:?} is not a socket address", device.address))
        })?;
        Ok(TcpTransport::connect(addr))
    }
}
