//! Server module - many peers over TCP.
//!
//! Provides:
//! - [`ClientRegistry`] - id-keyed peer set with snapshot broadcast
//! - [`TcpServer`] - accept loop registering each peer as a session
//! - [`OperatorCommand`] - console commands translated to registry calls

mod listener;
mod operator;
mod registry;

pub use listener::TcpServer;
pub use operator::{OperatorCommand, OperatorOutcome, HELP};
pub use registry::{ClientRegistry, ConnectionId, PeerInfo, RegistryEntry};
