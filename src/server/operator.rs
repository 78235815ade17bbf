//! Operator console commands for the multi-peer server.

use std::fmt;
use std::str::FromStr;

use super::registry::{ClientRegistry, PeerInfo};
use crate::error::{LinkError, Result};

/// Console help text.
pub const HELP: &str = "\
Available commands:
  list              - List all connected clients
  send <message>    - Send message to all clients
  led:on            - Turn on LED on all connected devices
  led:off           - Turn off LED on all connected devices
  get:sensor        - Request sensor readings from all devices
  quit              - Exit the server
  help              - Show this help message";

/// A line typed at the server console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    /// List connected peers.
    List,
    /// Broadcast free text.
    Send(String),
    /// Broadcast `LED:ON`.
    LedOn,
    /// Broadcast `LED:OFF`.
    LedOff,
    /// Broadcast `GET:SENSOR`.
    GetSensor,
    /// Show help.
    Help,
    /// Stop the server.
    Quit,
}

/// What executing an [`OperatorCommand`] produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorOutcome {
    /// Connected peers.
    Peers(Vec<PeerInfo>),
    /// A broadcast went out to this many peers.
    Broadcast {
        /// Peers attempted.
        attempted: usize,
    },
    /// Help text to show.
    Help(&'static str),
    /// The operator asked to stop.
    Quit,
}

impl OperatorCommand {
    /// Parse a console line. Keywords are case-insensitive; the text after
    /// `send ` is kept as typed.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let lower = input.to_ascii_lowercase();

        let command = match lower.as_str() {
            "list" => Self::List,
            "led:on" => Self::LedOn,
            "led:off" => Self::LedOff,
            "get:sensor" => Self::GetSensor,
            "help" => Self::Help,
            "quit" => Self::Quit,
            _ if lower.starts_with("send ") => {
                let text = input[5..].trim();
                if text.is_empty() {
                    return Err(LinkError::InvalidCommand(input.to_string()));
                }
                Self::Send(text.to_string())
            }
            _ => return Err(LinkError::InvalidCommand(input.to_string())),
        };
        Ok(command)
    }

    /// Line broadcast to peers, newline included, for broadcasting commands.
    pub fn wire_text(&self) -> Option<String> {
        let text = match self {
            Self::Send(text) => text.as_str(),
            Self::LedOn => "LED:ON",
            Self::LedOff => "LED:OFF",
            Self::GetSensor => "GET:SENSOR",
            Self::List | Self::Help | Self::Quit => return None,
        };
        Some(format!("{text}\n"))
    }

    /// Run the command against `registry`.
    pub async fn apply(&self, registry: &ClientRegistry) -> OperatorOutcome {
        if let Some(line) = self.wire_text() {
            let attempted = registry.broadcast(line).await;
            return OperatorOutcome::Broadcast { attempted };
        }
        match self {
            Self::List => OperatorOutcome::Peers(registry.peers()),
            Self::Quit => OperatorOutcome::Quit,
            _ => OperatorOutcome::Help(HELP),
        }
    }
}

impl FromStr for OperatorCommand {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for OperatorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List => f.write_str("list"),
            Self::Send(text) => write!(f, "send {text}"),
            Self::LedOn => f.write_str("led:on"),
            Self::LedOff => f.write_str("led:off"),
            Self::GetSensor => f.write_str("get:sensor"),
            Self::Help => f.write_str("help"),
            Self::Quit => f.write_str("quit"),
        }
    }
}
