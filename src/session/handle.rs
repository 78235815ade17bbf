//! Cloneable handle to a live session.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::state::StateCell;
use super::task::{Request, SessionTask};
use super::SessionState;
use crate::config::SessionConfig;
use crate::dispatch::NotificationDispatcher;
use crate::error::{LinkError, Result};
use crate::protocol::{validate, Command, MessageFramer};
use crate::transport::Transport;

struct Shared {
    peer: Arc<str>,
    state: StateCell,
    requests: mpsc::Sender<Request>,
    task: Mutex<Option<JoinHandle<()>>>,
    dispatcher: NotificationDispatcher,
    send_timeout: Duration,
    disconnect_grace: Duration,
}

/// Handle to one open session.
///
/// Cheap to clone; every clone talks to the same I/O task. Sends from any
/// task are queued to the I/O task and written in call order. The session
/// stays open while at least one handle exists or until
/// [`disconnect`](Self::disconnect).
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Open `transport` and start a session on it.
    ///
    /// The session enters at `Connecting` and is `Ready` when this returns.
    /// Used for peers that need no discovery, such as connections accepted
    /// by a listener.
    pub async fn establish<T: Transport>(
        transport: T,
        config: &SessionConfig,
        dispatcher: NotificationDispatcher,
    ) -> Result<Self> {
        let state = StateCell::starting_at(SessionState::Connecting);
        Self::establish_with(transport, state, config, dispatcher).await
    }

    /// Open `transport` for a session already in `Connecting`.
    pub(crate) async fn establish_with<T: Transport>(
        mut transport: T,
        state: StateCell,
        config: &SessionConfig,
        dispatcher: NotificationDispatcher,
    ) -> Result<Self> {
        let peer: Arc<str> = Arc::from(transport.peer());
        let span = tracing::info_span!("session", peer = %peer);

        if let Err(e) = config.validate() {
            state.close();
            return Err(e);
        }

        let events = match tokio::time::timeout(config.connect_timeout, transport.open()).await {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                tracing::warn!(parent: &span, "open failed: {e}");
                transport.close().await;
                state.close();
                return Err(e);
            }
            Err(_) => {
                tracing::warn!(parent: &span, timeout = ?config.connect_timeout, "open timed out");
                transport.close().await;
                state.close();
                return Err(LinkError::ConnectTimeout {
                    peer: peer.to_string(),
                    timeout: config.connect_timeout,
                });
            }
        };

        // Inbound events queue in `events` until the task starts, so nothing
        // the peer pushes right after opening is lost.
        if let Err(e) = span.in_scope(|| state.transition(SessionState::Ready)) {
            // Disconnected while opening.
            transport.close().await;
            return Err(e);
        }

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let task = SessionTask {
            transport,
            events,
            requests: rx,
            framer: MessageFramer::with_max_line_length(peer.clone(), config.max_line_length),
            state: state.clone(),
            dispatcher: dispatcher.clone(),
            send_timeout: config.send_timeout,
            keepalive: config.keepalive.clone(),
            peer: peer.clone(),
        };
        let join = tokio::spawn(task.run().instrument(span));

        Ok(Self {
            shared: Arc::new(Shared {
                peer,
                state,
                requests: tx,
                task: Mutex::new(Some(join)),
                dispatcher,
                send_timeout: config.send_timeout,
                disconnect_grace: config.disconnect_grace,
            }),
        })
    }

    /// Peer address.
    pub fn peer(&self) -> &str {
        &self.shared.peer
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.shared.state.get()
    }

    /// Watch state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Dispatcher that receives this session's inbound messages.
    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.shared.dispatcher
    }

    /// Send a command.
    ///
    /// Fails with `NotConnected` unless the session is `Ready`, with
    /// `SendTimeout` if the line is not written within the send timeout
    /// (the state is left as is), and with `TransportClosed` if the write
    /// fails (the session becomes `Degraded`).
    ///
    /// After a `SendTimeout` the line may still go out in full if its write
    /// had already started; it is never cut short.
    pub async fn send(&self, command: Command) -> Result<()> {
        self.send_line(format!("{command}\n")).await
    }

    /// Send raw operator text after checking it against the command grammar.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if !validate(text) {
            return Err(LinkError::InvalidCommand(text.to_string()));
        }
        self.send_line(format!("{text}\n")).await
    }

    /// Send bytes exactly as given, without grammar checks.
    ///
    /// Used for server broadcasts, whose payloads are not motor commands.
    pub async fn send_raw(&self, data: Bytes) -> Result<()> {
        self.submit(data).await
    }

    async fn send_line(&self, line: String) -> Result<()> {
        self.submit(Bytes::from(line)).await
    }

    async fn submit(&self, line: Bytes) -> Result<()> {
        let state = self.state();
        if state != SessionState::Ready {
            return Err(self.not_connected(state));
        }

        let (reply, response) = oneshot::channel();
        let request = Request::Write {
            line: line.clone(),
            reply,
        };
        // One deadline covers queueing, earlier writes and this one. A line
        // still queued when it passes is dropped by the task unsent.
        let exchange = async {
            self.shared
                .requests
                .send(request)
                .await
                .map_err(|_| self.not_connected(self.state()))?;
            response.await.unwrap_or_else(|_| {
                Err(LinkError::TransportClosed {
                    peer: self.shared.peer.to_string(),
                })
            })
        };

        match tokio::time::timeout(self.shared.send_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(LinkError::SendTimeout {
                peer: self.shared.peer.to_string(),
                command: command_preview(&line),
                timeout: self.shared.send_timeout,
            }),
        }
    }

    fn not_connected(&self, state: SessionState) -> LinkError {
        LinkError::NotConnected {
            peer: self.shared.peer.to_string(),
            state,
        }
    }

    /// Close the session.
    ///
    /// Asks the I/O task to close the transport and waits up to the
    /// configured grace period; then aborts the task. Always leaves the
    /// session `Closed`. Safe to call any number of times.
    pub async fn disconnect(&self) {
        let task = self
            .shared
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(task) = task {
            let (reply, done) = oneshot::channel();
            let graceful = tokio::time::timeout(self.shared.disconnect_grace, async {
                self.shared
                    .requests
                    .send(Request::Shutdown { reply })
                    .await
                    .ok()?;
                done.await.ok()
            })
            .await;

            if !matches!(graceful, Ok(Some(()))) && !task.is_finished() {
                tracing::warn!(peer = %self.shared.peer, "session did not close in time, aborting");
                task.abort();
            }
        }

        self.shared.state.close();
    }

    /// Resolve once the session is `Closed`.
    pub async fn closed(&self) {
        self.shared.state.closed().await
    }
}

/// Longest command text carried by a `SendTimeout`.
const PREVIEW_LEN: usize = 64;

fn command_preview(line: &[u8]) -> String {
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end();
    match text.char_indices().nth(PREVIEW_LEN) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("peer", &self.shared.peer)
            .field("state", &self.state())
            .finish()
    }
}
