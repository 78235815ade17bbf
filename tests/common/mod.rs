//! Scripted in-memory transport and connector shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use motorlink::device::Device;
use motorlink::error::{LinkError, Result};
use motorlink::transport::{
    BoxFuture, CloseReason, Connector, Transport, TransportEvent, TransportEvents,
};
use tokio::sync::{mpsc, Notify};

/// How the scripted transport answers a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Ok,
    Fail,
    Hang,
    /// Writes stop after half the bytes, and opens before starting, until
    /// [`Probe::release`].
    Stall,
    /// Writes panic inside the session's I/O task.
    Panic,
}

#[derive(Debug)]
struct Shared {
    written: Mutex<Vec<u8>>,
    open_mode: Mutex<Mode>,
    write_mode: Mutex<Mode>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    preload: Mutex<Vec<Bytes>>,
    closed: AtomicBool,
    writes: AtomicUsize,
    gate: Notify,
}

/// Test-side controls for a [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct Probe(Arc<Shared>);

impl Probe {
    pub fn new() -> Self {
        Self(Arc::new(Shared {
            written: Mutex::new(Vec::new()),
            open_mode: Mutex::new(Mode::Ok),
            write_mode: Mutex::new(Mode::Ok),
            events: Mutex::new(None),
            preload: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
            gate: Notify::new(),
        }))
    }

    pub fn transport(&self, peer: &str) -> ScriptedTransport {
        ScriptedTransport {
            peer: peer.to_string(),
            shared: self.0.clone(),
        }
    }

    pub fn set_open_mode(&self, mode: Mode) {
        *self.0.open_mode.lock().unwrap() = mode;
    }

    pub fn set_write_mode(&self, mode: Mode) {
        *self.0.write_mode.lock().unwrap() = mode;
    }

    /// Bytes delivered as soon as the transport opens.
    pub fn preload(&self, data: &'static [u8]) {
        self.0.preload.lock().unwrap().push(Bytes::from_static(data));
    }

    /// Everything written so far, as text.
    pub fn written(&self) -> String {
        String::from_utf8(self.0.written.lock().unwrap().clone()).unwrap()
    }

    pub fn lines(&self) -> Vec<String> {
        self.written().lines().map(str::to_string).collect()
    }

    /// Number of completed writes.
    pub fn writes(&self) -> usize {
        self.0.writes.load(Ordering::SeqCst)
    }

    /// Let one stalled open or write continue.
    pub fn release(&self) {
        self.0.gate.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }

    fn sender(&self) -> mpsc::Sender<TransportEvent> {
        self.0
            .events
            .lock()
            .unwrap()
            .clone()
            .expect("transport not open")
    }

    /// Deliver inbound bytes as the peer.
    pub async fn push(&self, data: &'static [u8]) {
        self.sender()
            .send(TransportEvent::Data(Bytes::from_static(data)))
            .await
            .unwrap();
    }

    /// End the channel from the peer side.
    pub async fn hang_up(&self) {
        let tx = self.sender();
        self.0.closed.store(true, Ordering::SeqCst);
        let _ = tx.send(TransportEvent::Closed(CloseReason::PeerClosed)).await;
    }
}

/// In-memory transport driven by a [`Probe`].
pub struct ScriptedTransport {
    peer: String,
    shared: Arc<Shared>,
}

impl Transport for ScriptedTransport {
    fn peer(&self) -> &str {
        &self.peer
    }

    fn open(&mut self) -> BoxFuture<'_, Result<TransportEvents>> {
        Box::pin(async move {
            let mode = *self.shared.open_mode.lock().unwrap();
            if mode == Mode::Stall {
                self.shared.gate.notified().await;
            }
            match mode {
                Mode::Ok | Mode::Stall | Mode::Panic => {
                    let (tx, rx) = mpsc::channel(64);
                    for chunk in self.shared.preload.lock().unwrap().drain(..) {
                        tx.try_send(TransportEvent::Data(chunk)).unwrap();
                    }
                    *self.shared.events.lock().unwrap() = Some(tx);
                    Ok(rx)
                }
                Mode::Fail => Err(LinkError::ConnectFailed {
                    peer: self.peer.clone(),
                    reason: "refused".to_string(),
                }),
                Mode::Hang => std::future::pending().await,
            }
        })
    }

    fn write<'a>(&'a mut self, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.shared.closed.load(Ordering::SeqCst) {
                return Err(LinkError::TransportClosed {
                    peer: self.peer.clone(),
                });
            }
            let mode = *self.shared.write_mode.lock().unwrap();
            match mode {
                Mode::Ok => {
                    self.shared.written.lock().unwrap().extend_from_slice(data);
                    self.shared.writes.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                Mode::Fail => Err(LinkError::TransportClosed {
                    peer: self.peer.clone(),
                }),
                Mode::Hang => std::future::pending().await,
                Mode::Panic => panic!("scripted write panic"),
                Mode::Stall => {
                    let (head, tail) = data.split_at(data.len() / 2);
                    self.shared.written.lock().unwrap().extend_from_slice(head);
                    self.shared.gate.notified().await;
                    self.shared.written.lock().unwrap().extend_from_slice(tail);
                    self.shared.writes.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.shared.closed.swap(true, Ordering::SeqCst) {
                if let Some(tx) = self.shared.events.lock().unwrap().take() {
                    let _ = tx.try_send(TransportEvent::Closed(CloseReason::Local));
                }
            }
        })
    }
}

/// Connector over scripted devices.
pub struct MockConnector {
    devices: Vec<Device>,
    probes: HashMap<String, Probe>,
    /// When set, `scan` never finishes.
    stall_scan: bool,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            probes: HashMap::new(),
            stall_scan: false,
        }
    }

    /// Add a device and return the probe controlling its transport.
    pub fn device(&mut self, name: &str, address: &str) -> Probe {
        let probe = Probe::new();
        self.devices.push(Device::new(name, address, Some(-60)));
        self.probes.insert(address.to_string(), probe.clone());
        probe
    }

    pub fn stalled() -> Self {
        Self {
            stall_scan: true,
            ..Self::new()
        }
    }
}

impl Connector for MockConnector {
    type Transport = ScriptedTransport;

    fn scan(&self, _timeout: Duration) -> BoxFuture<'_, Result<Vec<Device>>> {
        let devices = self.devices.clone();
        let stall = self.stall_scan;
        Box::pin(async move {
            if stall {
                std::future::pending::<()>().await;
            }
            Ok(devices)
        })
    }

    fn transport(&self, device: &Device) -> Result<ScriptedTransport> {
        self.probes
            .get(&device.address)
            .map(|p| p.transport(&device.address))
            .ok_or_else(|| LinkError::InvalidArgument(format!("unknown device {device}")))
    }
}
