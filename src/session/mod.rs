//! Session module - connection lifecycle and command routing.
//!
//! Provides:
//! - [`SessionManager`] - discovery, connect, send, disconnect for one device
//! - [`SessionHandle`] - cloneable handle to an open session
//! - [`SessionState`] - the lifecycle state machine
//!
//! Each open session runs one I/O task that owns its transport. Handles talk
//! to it through a bounded request queue.

mod handle;
mod manager;
mod state;
mod task;

pub use handle::SessionHandle;
pub use manager::SessionManager;
pub use state::SessionState;
