//! Session lifecycle over a [`Connector`].

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::Instrument;

use super::state::StateCell;
use super::{SessionHandle, SessionState};
use crate::config::SessionConfig;
use crate::device::Device;
use crate::dispatch::{NotificationDispatcher, SubscriptionId};
use crate::error::{LinkError, Result};
use crate::protocol::{Command, Message};
use crate::transport::Connector;

/// Extra time a connector gets to report after its scan window closes.
const SCAN_GRACE: Duration = Duration::from_millis(500);

/// Drives one session from discovery to close.
///
/// A manager runs through the state machine once. After `Closed`, build a
/// new manager to connect again.
///
/// # Example
///
/// ```ignore
/// use motorlink::{SessionConfig, SessionManager, Command};
/// use motorlink::transport::TcpConnector;
///
/// let connector = TcpConnector::new().endpoint("StepperMotor", "192.168.1.40:8888".parse()?);
/// let manager = SessionManager::new(connector, SessionConfig::default());
///
/// manager.subscribe(|msg| println!("{}", msg.text));
/// manager.connect().await?;
/// manager.send(Command::absolute_move(90.0)?).await?;
/// manager.disconnect().await;
/// ```
pub struct SessionManager<C: Connector> {
    connector: C,
    config: SessionConfig,
    state: StateCell,
    dispatcher: NotificationDispatcher,
    session: Mutex<Slot>,
}

#[derive(Default)]
struct Slot {
    handle: Option<SessionHandle>,
    /// Set by `disconnect`; a connect finishing afterwards must not keep
    /// its session.
    shut: bool,
}

impl<C: Connector> SessionManager<C> {
    /// Create an `Idle` manager.
    pub fn new(connector: C, config: SessionConfig) -> Self {
        Self {
            connector,
            config,
            state: StateCell::new(),
            dispatcher: NotificationDispatcher::new(),
            session: Mutex::new(Slot::default()),
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Watch state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Configuration in use.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Dispatcher for inbound messages.
    pub fn dispatcher(&self) -> &NotificationDispatcher {
        &self.dispatcher
    }

    /// The open session, if any.
    pub fn session(&self) -> Option<SessionHandle> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handle
            .clone()
    }

    /// List visible devices without changing state.
    pub async fn scan(&self, timeout: Duration) -> Result<Vec<Device>> {
        match tokio::time::timeout(timeout + SCAN_GRACE, self.connector.scan(timeout)).await {
            Ok(result) => result,
            Err(_) => Ok(Vec::new()),
        }
    }

    /// Discover a device on the allow-list and connect to it.
    ///
    /// Fails with `DeviceNotFound` when discovery times out without a match,
    /// and with `ConnectFailed` or `ConnectTimeout` when opening fails or a
    /// [`disconnect`](Self::disconnect) cuts it short. The session is
    /// `Closed` after any failure.
    pub async fn connect(&self) -> Result<SessionHandle> {
        self.state.transition(SessionState::Discovering)?;

        let timeout = self.config.scan_timeout;
        let found = async {
            let scan = self.connector.scan(timeout);
            let devices = match tokio::time::timeout(timeout + SCAN_GRACE, scan).await {
                Ok(result) => result?,
                Err(_) => Vec::new(),
            };
            tracing::debug!(count = devices.len(), "scan finished");
            Ok::<_, LinkError>(
                devices
                    .into_iter()
                    .find(|d| d.is_target(self.config.device_names.as_slice())),
            )
        }
        .instrument(tracing::info_span!("discover"))
        .await;

        let device = match found {
            Ok(Some(device)) => device,
            Ok(None) => {
                self.state.close();
                return Err(LinkError::DeviceNotFound {
                    names: self.config.device_names.clone(),
                    timeout,
                });
            }
            Err(e) => {
                self.state.close();
                return Err(e);
            }
        };

        tracing::info!(device = %device, "device found");
        self.open(device).await
    }

    /// Connect to a device from an earlier [`scan`](Self::scan).
    pub async fn connect_to(&self, device: Device) -> Result<SessionHandle> {
        self.state.transition(SessionState::Discovering)?;
        self.open(device).await
    }

    async fn open(&self, device: Device) -> Result<SessionHandle> {
        if let Err(e) = self.state.transition(SessionState::Connecting) {
            return Err(self.interrupted(e, &device));
        }

        let transport = match self.connector.transport(&device) {
            Ok(transport) => transport,
            Err(e) => {
                self.state.close();
                return Err(e);
            }
        };

        let handle = SessionHandle::establish_with(
            transport,
            self.state.clone(),
            &self.config,
            self.dispatcher.clone(),
        )
        .await
        .map_err(|e| self.interrupted(e, &device))?;

        let shut = {
            let mut slot = self.session.lock().unwrap_or_else(PoisonError::into_inner);
            if !slot.shut {
                slot.handle = Some(handle.clone());
            }
            slot.shut
        };
        if shut {
            handle.disconnect().await;
            return Err(disconnected(&device));
        }
        Ok(handle)
    }

    /// A transition refused because `disconnect` closed the session mid-connect.
    fn interrupted(&self, error: LinkError, device: &Device) -> LinkError {
        match error {
            LinkError::InvalidTransition { .. } if self.state.get().is_closed() => {
                disconnected(device)
            }
            other => other,
        }
    }

    /// Send a command to the connected device.
    pub async fn send(&self, command: Command) -> Result<()> {
        self.current()?.send(command).await
    }

    /// Send raw operator text after checking it against the command grammar.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.current()?.send_text(text).await
    }

    fn current(&self) -> Result<SessionHandle> {
        self.session().ok_or_else(|| LinkError::NotConnected {
            peer: "-".to_string(),
            state: self.state(),
        })
    }

    /// Close the session from any state. Idempotent.
    pub async fn disconnect(&self) {
        let session = {
            let mut slot = self.session.lock().unwrap_or_else(PoisonError::into_inner);
            slot.shut = true;
            slot.handle.take()
        };
        if let Some(session) = session {
            session.disconnect().await;
        }
        self.state.close();
    }

    /// Register a callback for inbound messages.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(callback)
    }

    /// Remove a callback.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }
}

fn disconnected(device: &Device) -> LinkError {
    LinkError::ConnectFailed {
        peer: device.address.clone(),
        reason: "disconnected while connecting".to_string(),
    }
}
