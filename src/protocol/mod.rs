//! Protocol module - command grammar, line framing, and message types.
//!
//! This module implements the text protocol spoken on both transports:
//! - One command or notification per line, terminated by `\n`
//! - Line framer for accumulating partial reads
//! - Typed commands with validated arguments

mod command;
mod framer;
mod message;

pub use command::{validate, Command, Degrees, SpeedLevel, MAX_SPEED, MIN_SPEED, OPCODES};
pub use framer::{DecodeWarning, MessageFramer, Messages, DEFAULT_MAX_LINE_LENGTH};
pub use message::{extract_angle, Message};
