//! Bluetooth Low Energy transport (feature `ble`).
//!
//! The controller exposes one GATT service with two characteristics: the host
//! writes command lines to [`COMMAND_CHARACTERISTIC`] and receives status
//! notifications on [`STATUS_CHARACTERISTIC`]. Writes are split into chunks of
//! [`MAX_WRITE_SIZE`] bytes to fit the controller's attribute size.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::StreamExt;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{
    event_channel, BoxFuture, CloseNotifier, CloseReason, Connector, Transport, TransportEvents,
};
use crate::device::Device;
use crate::error::{LinkError, Result};

/// Motor control service.
pub const MOTOR_SERVICE: Uuid = Uuid::from_u128(0x19B10000_E8F2_537E_4F6C_D104768A1214);

/// Characteristic the host writes commands to.
pub const COMMAND_CHARACTERISTIC: Uuid = Uuid::from_u128(0x19B10001_E8F2_537E_4F6C_D104768A1214);

/// Characteristic the controller notifies status on.
pub const STATUS_CHARACTERISTIC: Uuid = Uuid::from_u128(0x19B10002_E8F2_537E_4F6C_D104768A1214);

/// Largest single characteristic write.
pub const MAX_WRITE_SIZE: usize = 20;

/// Discovers controllers with the first Bluetooth adapter.
///
/// Peripherals seen by the latest [`scan`](Connector::scan) are remembered by
/// address so [`transport`](Connector::transport) can reach them.
pub struct BleConnector {
    adapter: Adapter,
    seen: Mutex<HashMap<String, Peripheral>>,
}

impl BleConnector {
    /// Open the system Bluetooth manager and pick its first adapter.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| LinkError::ConnectFailed {
                peer: "bluetooth".to_string(),
                reason: "no adapter available".to_string(),
            })?;

        Ok(Self {
            adapter,
            seen: Mutex::new(HashMap::new()),
        })
    }

    async fn scan_inner(&self, timeout: Duration) -> Result<Vec<Device>> {
        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(timeout).await;
        let peripherals = self.adapter.peripherals().await;
        if let Err(e) = self.adapter.stop_scan().await {
            tracing::debug!("stop_scan failed: {e}");
        }

        let mut devices = Vec::new();
        let mut seen = HashMap::new();
        for peripheral in peripherals? {
            let Some(props) = peripheral.properties().await? else {
                continue;
            };
            let address = props.address.to_string();
            let device = Device::new(
                props.local_name.unwrap_or_else(|| "Unknown".to_string()),
                address.clone(),
                props.rssi,
            );
            tracing::debug!(device = %device, "peripheral found");
            devices.push(device);
            seen.insert(address, peripheral);
        }

        *self.seen.lock().unwrap_or_else(PoisonError::into_inner) = seen;
        Ok(devices)
    }
}

impl Connector for BleConnector {
    type Transport = BleTransport;

    fn scan(&self, timeout: Duration) -> BoxFuture<'_, Result<Vec<Device>>> {
        Box::pin(self.scan_inner(timeout))
    }

    fn transport(&self, device: &Device) -> Result<BleTransport> {
        let peripheral = self
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&device.address)
            .cloned()
            .ok_or_else(|| {
                LinkError::InvalidArgument(format!("{device} was not seen by the last scan"))
            })?;

        Ok(BleTransport {
            peer: device.address.clone(),
            adapter: self.adapter.clone(),
            peripheral,
            phase: Phase::Idle,
        })
    }
}

struct BleLink {
    command: Characteristic,
    pump: JoinHandle<()>,
    notifier: CloseNotifier,
}

/// How far `open` got with the peripheral.
enum Phase {
    Idle,
    /// `connect` was issued; setup may have stopped partway.
    Connected,
    Open(BleLink),
}

impl Phase {
    fn link(&self) -> Option<&BleLink> {
        match self {
            Phase::Open(link) => Some(link),
            _ => None,
        }
    }

    /// Reset to `Idle`. Returns whether the peripheral must be disconnected,
    /// and the live link if there was one.
    fn teardown(&mut self) -> (bool, Option<BleLink>) {
        match std::mem::replace(self, Phase::Idle) {
            Phase::Idle => (false, None),
            Phase::Connected => (true, None),
            Phase::Open(link) => (true, Some(link)),
        }
    }
}

/// GATT connection to one controller.
pub struct BleTransport {
    peer: String,
    adapter: Adapter,
    peripheral: Peripheral,
    phase: Phase,
}

impl BleTransport {
    fn connect_failed(&self, e: impl std::fmt::Display) -> LinkError {
        LinkError::ConnectFailed {
            peer: self.peer.clone(),
            reason: e.to_string(),
        }
    }

    async fn open_inner(&mut self) -> Result<TransportEvents> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(self.connect_failed("already open"));
        }

        // Set first: a failed or cancelled setup still leaves a link-layer
        // connection that `close` has to drop.
        self.phase = Phase::Connected;
        self.peripheral
            .connect()
            .await
            .map_err(|e| self.connect_failed(e))?;
        self.peripheral
            .discover_services()
            .await
            .map_err(|e| self.connect_failed(e))?;

        let characteristics = self.peripheral.characteristics();
        let find = |uuid: Uuid| {
            characteristics
                .iter()
                .find(|c| c.uuid == uuid && c.service_uuid == MOTOR_SERVICE)
                .cloned()
        };
        let command = find(COMMAND_CHARACTERISTIC)
            .ok_or_else(|| self.connect_failed("command characteristic missing"))?;
        let status = find(STATUS_CHARACTERISTIC)
            .ok_or_else(|| self.connect_failed("status characteristic missing"))?;

        // Subscribe before returning so no notification is missed.
        let notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| self.connect_failed(e))?;
        self.peripheral
            .subscribe(&status)
            .await
            .map_err(|e| self.connect_failed(e))?;
        let central_events = self
            .adapter
            .events()
            .await
            .map_err(|e| self.connect_failed(e))?;

        let (notifier, events) = event_channel();
        let pump = tokio::spawn(pump_notifications(
            notifications,
            central_events,
            self.peripheral.id(),
            notifier.clone(),
            self.peer.clone(),
        ));

        self.phase = Phase::Open(BleLink {
            command,
            pump,
            notifier,
        });
        tracing::info!(peer = %self.peer, "ble link open");
        Ok(events)
    }

    async fn write_inner(&mut self, data: &[u8]) -> Result<()> {
        let closed = || LinkError::TransportClosed {
            peer: self.peer.clone(),
        };
        let Some(link) = self.phase.link().filter(|l| !l.notifier.is_closed()) else {
            return Err(closed());
        };

        for chunk in data.chunks(MAX_WRITE_SIZE) {
            if let Err(e) = self
                .peripheral
                .write(&link.command, chunk, WriteType::WithResponse)
                .await
            {
                tracing::debug!(peer = %self.peer, "write failed: {e}");
                return Err(closed());
            }
        }
        Ok(())
    }

    async fn close_inner(&mut self) {
        let (connected, link) = self.phase.teardown();
        if let Some(link) = &link {
            link.pump.abort();
        }
        if connected {
            if let Err(e) = self.peripheral.disconnect().await {
                tracing::debug!(peer = %self.peer, "disconnect failed: {e}");
            }
            tracing::debug!(peer = %self.peer, "ble link closed");
        }
        if let Some(link) = link {
            link.notifier.closed_now(CloseReason::Local);
        }
    }
}

impl Transport for BleTransport {
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

impl Drop for BleTransport {
    fn drop(&mut self) {
        if let Some(link) = self.phase.link() {
            link.pump.abort();
        }
    }
}

async fn pump_notifications<N, E>(
    mut notifications: N,
    mut central_events: E,
    id: btleplug::platform::PeripheralId,
    notifier: CloseNotifier,
    peer: String,
) where
    N: futures::Stream<Item = btleplug::api::ValueNotification> + Unpin,
    E: futures::Stream<Item = CentralEvent> + Unpin,
{
    loop {
        tokio::select! {
            notification = notifications.next() => match notification {
                Some(n) if n.uuid == STATUS_CHARACTERISTIC => {
                    if !notifier.data(Bytes::from(n.value)).await {
                        return;
                    }
                }
                Some(_) => {}
                None => {
                    tracing::debug!(peer = %peer, "notification stream ended");
                    notifier.closed(CloseReason::PeerClosed).await;
                    return;
                }
            },
            event = central_events.next() => match event {
                Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => {
                    tracing::info!(peer = %peer, "peripheral disconnected");
                    notifier.closed(CloseReason::PeerClosed).await;
                    return;
                }
                Some(_) => {}
                None => {
                    notifier.closed(CloseReason::Error("adapter event stream ended".into())).await;
                    return;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_characteristic_ids() {
        assert_eq!(
            MOTOR_SERVICE.to_string(),
            "19b10000-e8f2-537e-4f6c-d104768a1214"
        );
        assert_eq!(
            COMMAND_CHARACTERISTIC.to_string(),
            "19b10001-e8f2-537e-4f6c-d104768a1214"
        );
        assert_eq!(
            STATUS_CHARACTERISTIC.to_string(),
            "19b10002-e8f2-537e-4f6c-d104768a1214"
        );
    }

    #[test]
    fn test_partial_setup_is_disconnected() {
        let mut phase = Phase::Connected;
        let (connected, link) = phase.teardown();
        assert!(connected);
        assert!(link.is_none());

        let (connected, _) = phase.teardown();
        assert!(!connected);
        assert!(matches!(phase, Phase::Idle));
    }

    #[test]
    fn test_idle_needs_no_disconnect() {
        let mut phase = Phase::Idle;
        assert!(!phase.teardown().0);
        assert!(phase.link().is_none());
    }

    #[test]
    fn test_write_chunking() {
        let line = b"a123.456789012345678\n";
        let chunks: Vec<&[u8]> = line.chunks(MAX_WRITE_SIZE).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1], b"\n");
    }
}
