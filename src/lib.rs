//! # motorlink
//!
//! Session layer for driving a stepper-motor controller over Bluetooth Low
//! Energy or TCP.
//!
//! The controller speaks a line protocol: the host sends short ASCII commands
//! (`a90`, `r-15`, `s`, ...) and the controller pushes status lines back
//! (`angle: 90.0 deg`). This crate handles everything between those lines
//! and the radio or socket.
//!
//! ## Architecture
//!
//! - **Transport**: byte channel to one peer (TCP socket, or a BLE
//!   write/notify characteristic pair with feature `ble`)
//! - **Session**: one I/O task per peer owning its transport, framing inbound
//!   bytes into messages and writing commands in call order
//! - **Dispatch**: fan-out of inbound messages to subscribers
//! - **Server**: many TCP peers with snapshot broadcast
//!
//! ## Example
//!
//! ```ignore
//! use motorlink::{Command, SessionConfig, SessionManager};
//! use motorlink::transport::TcpConnector;
//!
//! #[tokio::main]
//! async fn main() -> motorlink::Result<()> {
//!     let connector = TcpConnector::new()
//!         .endpoint("StepperMotor", "192.168.1.40:8888".parse().unwrap());
//!     let manager = SessionManager::new(connector, SessionConfig::default());
//!
//!     manager.subscribe(|msg| {
//!         if let Some(angle) = msg.angle() {
//!             println!("at {angle} deg");
//!         }
//!     });
//!
//!     manager.connect().await?;
//!     manager.send(Command::absolute_move(90.0)?).await?;
//!     manager.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod transport;

pub use config::{KeepAliveConfig, ServerConfig, SessionConfig};
pub use device::Device;
pub use dispatch::{NotificationDispatcher, SubscriptionId};
pub use error::{LinkError, Result};
pub use protocol::{Command, Message};
pub use session::{SessionHandle, SessionManager, SessionState};
