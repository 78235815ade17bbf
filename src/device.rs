//! Remote peer identity produced by discovery.

use std::fmt;
use std::net::SocketAddr;

use serde::Serialize;

/// A discovered peer: its advertised name, address, and signal quality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    /// Advertised name, or `Unknown` when the peer sent none.
    pub name: String,
    /// BLE hardware address or `host:port` endpoint.
    pub address: String,
    /// Received signal strength in dBm, when the transport reports one.
    pub rssi: Option<i16>,
}

impl Device {
    /// Create a device record.
    pub fn new(name: impl Into<String>, address: impl Into<String>, rssi: Option<i16>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            rssi,
        }
    }

    /// Device record for a socket peer, named after its address.
    pub fn endpoint(addr: SocketAddr) -> Self {
        Self::new(addr.to_string(), addr.to_string(), None)
    }

    /// Check the advertised name against an allow-list (exact match).
    pub fn is_target<S: AsRef<str>>(&self, names: &[S]) -> bool {
        names.iter().any(|n| n.as_ref() == self.name)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.address)?;
        if let Some(rssi) = self.rssi {
            write!(f, " {rssi} dBm")?;
        }
        Ok(())
    }
}
