//! TCP accept loop feeding the client registry.

use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use super::operator::{OperatorCommand, OperatorOutcome};
use super::registry::ClientRegistry;
use crate::config::{ServerConfig, SessionConfig};
use crate::dispatch::NotificationDispatcher;
use crate::error::Result;
use crate::session::SessionHandle;
use crate::transport::TcpTransport;

/// Multi-peer TCP server.
///
/// Every accepted connection becomes a session registered in
/// [`registry`](Self::registry). Lines from all peers go to one shared
/// [`dispatcher`](Self::dispatcher), tagged with the peer address.
///
/// # Example
///
/// ```ignore
/// use motorlink::server::TcpServer;
/// use motorlink::ServerConfig;
/// use tokio_util::sync::CancellationToken;
///
/// let server = TcpServer::bind(&ServerConfig::default()).await?;
/// server.dispatcher().subscribe(|msg| println!("{}: {}", msg.peer, msg.text));
///
/// let cancel = CancellationToken::new();
/// server.run(cancel.child_token()).await?;
/// ```
pub struct TcpServer {
    listener: TcpListener,
    session: SessionConfig,
    registry: ClientRegistry,
    dispatcher: NotificationDispatcher,
}

impl TcpServer {
    /// Bind the listening socket.
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_target()).await?;
        tracing::info!(addr = %listener.local_addr()?, "server listening");
        Ok(Self {
            listener,
            session: config.session.clone(),
            registry: ClientRegistry::new(),
            dispatcher: NotificationDispatcher::new(),
        })
    }

    /// Address actually bound, useful with port `0`.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Connected peers.
    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    /// Dispatcher receiving every peer's messages.
    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// Accept peers until `cancel` fires, then disconnect all of them.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.spawn_peer(stream, addr, cancel.child_token()),
                    Err(e) => tracing::warn!("accept failed: {e}"),
                },
            }
        }

        tracing::info!(peers = self.registry.len(), "server shutting down");
        self.registry.disconnect_all().await;
        Ok(())
    }

    /// Run an operator command against the connected peers.
    pub async fn execute(&self, command: &OperatorCommand) -> OperatorOutcome {
        command.apply(&self.registry).await
    }

    fn spawn_peer(&self, stream: TcpStream, addr: SocketAddr, cancel: CancellationToken) {
        let registry = self.registry.clone();
        let dispatcher = self.dispatcher.clone();
        let config = self.session.clone();

        tokio::spawn(async move {
            tracing::info!(peer = %addr, "new connection");
            let transport = TcpTransport::from_stream(stream, addr);
            let session = match SessionHandle::establish(transport, &config, dispatcher).await {
                Ok(session) => session,
                Err(e) => {
                    tracing::warn!(peer = %addr, "session setup failed: {e}");
                    return;
                }
            };

            let id = registry.register(session.clone());
            tokio::select! {
                _ = session.closed() => {}
                _ = cancel.cancelled() => session.disconnect().await,
            }
            registry.unregister(id);
            tracing::info!(connection_id = %id, peer = %addr, "connection closed");
        });
    }
}
