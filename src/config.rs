//! Session and server configuration.
//!
//! Both structs deserialize from JSON with every field optional; durations are
//! given in milliseconds.
//!
//! ```
//! use std::time::Duration;
//! use motorlink::config::SessionConfig;
//!
//! let config = SessionConfig::from_json_str(r#"{ "send_timeout_ms": 2000 }"#).unwrap();
//! assert_eq!(config.send_timeout, Duration::from_secs(2));
//! assert_eq!(config.device_names, ["StepperMotor", "Arduino"]);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};
use crate::protocol::DEFAULT_MAX_LINE_LENGTH;

/// Names the controller firmware advertises.
pub const DEFAULT_DEVICE_NAMES: [&str; 2] = ["StepperMotor", "Arduino"];

/// Default discovery timeout.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connection timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default per-send timeout.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default wait for a graceful close before the I/O task is aborted.
pub const DEFAULT_DISCONNECT_GRACE: Duration = Duration::from_secs(1);

/// Default capacity of the session request queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default TCP server bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// Default TCP server port.
pub const DEFAULT_PORT: u16 = 8888;

/// Configuration for one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Advertised names accepted during discovery.
    pub device_names: Vec<String>,
    /// How long discovery may run.
    #[serde(rename = "scan_timeout_ms", with = "millis")]
    pub scan_timeout: Duration,
    /// How long opening the transport may take.
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,
    /// How long a single send may take.
    #[serde(rename = "send_timeout_ms", with = "millis")]
    pub send_timeout: Duration,
    /// How long disconnect waits for a graceful close.
    #[serde(rename = "disconnect_grace_ms", with = "millis")]
    pub disconnect_grace: Duration,
    /// Outstanding requests before `send` waits for room.
    pub queue_capacity: usize,
    /// Longest inbound line accepted by the framer.
    pub max_line_length: usize,
    /// Liveness checking; disabled when absent.
    pub keepalive: Option<KeepAliveConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_names: DEFAULT_DEVICE_NAMES.iter().map(|s| s.to_string()).collect(),
            scan_timeout: DEFAULT_SCAN_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            disconnect_grace: DEFAULT_DISCONNECT_GRACE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            keepalive: None,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON.
    ///
    /// The result is checked with [`validate`](Self::validate).
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values a session cannot run with.
    ///
    /// Fields are public, so sessions check again when they start.
    pub fn validate(&self) -> Result<()> {
        match &self.keepalive {
            Some(keepalive) => keepalive.validate(),
            None => Ok(()),
        }
    }

    /// Replace the device-name allow-list.
    pub fn device_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.device_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Set the discovery timeout.
    pub fn scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-send timeout.
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Set the disconnect grace period.
    pub fn disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }

    /// Set the request queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the inbound line limit.
    pub fn max_line_length(mut self, length: usize) -> Self {
        self.max_line_length = length;
        self
    }

    /// Enable liveness checking.
    pub fn keepalive(mut self, keepalive: KeepAliveConfig) -> Self {
        self.keepalive = Some(keepalive);
        self
    }
}

/// Liveness checking for a `Ready` session.
///
/// Every `interval` the session looks at how long the peer has been silent.
/// Past `idle_timeout` it is marked degraded. When `probe` is set, a silent
/// peer is first sent a status query to prompt a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveConfig {
    /// Time between checks.
    #[serde(rename = "interval_ms", with = "millis")]
    pub interval: Duration,
    /// Silence after which the peer counts as unresponsive.
    #[serde(rename = "idle_timeout_ms", with = "millis")]
    pub idle_timeout: Duration,
    /// Send a status query when the peer has been silent for an interval.
    #[serde(default = "default_probe")]
    pub probe: bool,
}

fn default_probe() -> bool {
    true
}

impl KeepAliveConfig {
    /// Probe every `interval`; give up after `idle_timeout` of silence.
    ///
    /// Fails with `InvalidArgument` if either duration is zero.
    pub fn new(interval: Duration, idle_timeout: Duration) -> Result<Self> {
        let keepalive = Self {
            interval,
            idle_timeout,
            probe: true,
        };
        keepalive.validate()?;
        Ok(keepalive)
    }

    /// Both durations must be non-zero.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(LinkError::InvalidArgument(
                "keep-alive interval must be non-zero".to_string(),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(LinkError::InvalidArgument(
                "keep-alive idle timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Enable or disable status-query probes.
    pub fn probe(mut self, probe: bool) -> Self {
        self.probe = probe;
        self
    }
}

/// Configuration for the multi-peer TCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to listen on.
    pub bind_address: String,
    /// Port to listen on; `0` picks a free port.
    pub port: u16,
    /// Settings applied to every accepted peer.
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            session: SessionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Parse a configuration from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.session.validate()?;
        Ok(config)
    }

    /// `address:port` string for binding.
    pub fn bind_target(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
