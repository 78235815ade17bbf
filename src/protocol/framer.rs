//! Line framer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management. Inbound notifications from
//! the controller are newline-terminated text, but a radio link delivers them
//! in arbitrary slices: a single notification may hold half a line, or
//! several lines at once.
//!
//! The framer is a pure function of the bytes it has been fed. Feeding a byte
//! sequence in one call yields the same messages as feeding it split at any
//! boundaries.
//!
//! # Example
//!
//! ```
//! use motorlink::protocol::MessageFramer;
//!
//! let mut framer = MessageFramer::new("demo");
//!
//! assert_eq!(framer.feed(b"ang").count(), 0);
//! let texts: Vec<String> = framer.feed(b"le: 90.0 deg\nok\n").map(|m| m.text).collect();
//! assert_eq!(texts, ["angle: 90.0 deg", "ok"]);
//! ```

use std::sync::Arc;

use bytes::BytesMut;

use super::Message;

/// Default maximum line length in bytes (excluding the delimiter).
pub const DEFAULT_MAX_LINE_LENGTH: usize = 4096;

/// Line delimiter.
const DELIMITER: u8 = b'\n';

/// Non-fatal problem encountered while framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeWarning {
    /// A line was not valid UTF-8; invalid sequences were replaced.
    InvalidUtf8 {
        /// The line after lossy decoding.
        lossy: String,
    },
    /// A line exceeded the maximum length and was discarded.
    LineTooLong {
        /// Bytes dropped so far for this line.
        discarded: usize,
    },
}

impl std::fmt::Display for DecodeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidUtf8 { lossy } => write!(f, "invalid UTF-8 in line {lossy:?}"),
            Self::LineTooLong { discarded } => {
                write!(f, "line too long, discarded {discarded} bytes")
            }
        }
    }
}

/// Buffer for accumulating inbound bytes and extracting complete lines.
pub struct MessageFramer {
    /// Bytes received but not yet framed. Holds at most one partial line
    /// once a [`Messages`] iterator has been drained.
    buffer: BytesMut,
    /// Peer label stamped on every produced message.
    peer: Arc<str>,
    /// Longest accepted line.
    max_line_length: usize,
    /// Set while dropping the tail of an over-long line.
    skipping: bool,
    /// Warnings not yet collected by the caller.
    warnings: Vec<DecodeWarning>,
}

impl MessageFramer {
    /// Create a framer with the default line limit.
    pub fn new(peer: impl Into<Arc<str>>) -> Self {
        Self::with_max_line_length(peer, DEFAULT_MAX_LINE_LENGTH)
    }

    /// Create a framer with a custom line limit.
    pub fn with_max_line_length(peer: impl Into<Arc<str>>, max_line_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(256),
            peer: peer.into(),
            max_line_length,
            skipping: false,
            warnings: Vec::new(),
        }
    }

    /// Push data into the buffer and iterate the messages it completes.
    ///
    /// The iterator is lazy: lines are split off the buffer as it is advanced.
    /// Lines left unconsumed when it is dropped are yielded by the next call.
    pub fn feed(&mut self, data: &[u8]) -> Messages<'_> {
        self.buffer.extend_from_slice(data);
        Messages { framer: self }
    }

    /// Take the warnings recorded since the last call.
    pub fn take_warnings(&mut self) -> Vec<DecodeWarning> {
        std::mem::take(&mut self.warnings)
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop any partial line.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.skipping = false;
    }

    fn warn(&mut self, warning: DecodeWarning) {
        tracing::warn!(peer = %self.peer, "{warning}");
        self.warnings.push(warning);
    }

    /// Try to extract a single message from the buffer.
    fn next_message(&mut self) -> Option<Message> {
        loop {
            let Some(pos) = self.buffer.iter().position(|&b| b == DELIMITER) else {
                if self.buffer.len() > self.max_line_length {
                    let discarded = self.buffer.len();
                    self.buffer.clear();
                    self.skipping = true;
                    self.warn(DecodeWarning::LineTooLong { discarded });
                }
                return None;
            };

            let line = self.buffer.split_to(pos + 1);
            let body = &line[..pos];

            if self.skipping {
                self.skipping = false;
                self.warn(DecodeWarning::LineTooLong { discarded: body.len() });
                continue;
            }
            if body.len() > self.max_line_length {
                self.warn(DecodeWarning::LineTooLong { discarded: body.len() });
                continue;
            }

            let text = match std::str::from_utf8(body) {
                Ok(text) => text.trim().to_string(),
                Err(_) => {
                    let lossy = String::from_utf8_lossy(body).trim().to_string();
                    self.warn(DecodeWarning::InvalidUtf8 {
                        lossy: lossy.clone(),
                    });
                    lossy
                }
            };

            if text.is_empty() {
                continue;
            }
            return Some(Message::new(text, self.peer.clone()));
        }
    }
}

/// Lazy iterator over the messages completed by one [`MessageFramer::feed`].
#[must_use = "messages are only split off the buffer while iterating"]
pub struct Messages<'a> {
    framer: &'a mut MessageFramer,
}

impl Iterator for Messages<'_> {
    type Item = Message;

    fn next(&mut self) -> Option<Message> {
        self.framer.next_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(framer: &mut MessageFramer, data: &[u8]) -> Vec<String> {
        framer.feed(data).map(|m| m.text).collect()
    }

    #[test]
    fn test_single_complete_line() {
        let mut framer = MessageFramer::new("t");
        assert_eq!(texts(&mut framer, b"hello\n"), ["hello"]);
        assert!(framer.is_empty());
    }

    #[test]
    fn test_multiple_lines_in_one_feed() {
        let mut framer = MessageFramer::new("t");
        assert_eq!(
            texts(&mut framer, b"first\nsecond\nthird\n"),
            ["first", "second", "third"]
        );
        assert!(framer.is_empty());
    }

    #[test]
    fn test_partial_fragment_retained() {
        let mut framer = MessageFramer::new("t");
        assert!(texts(&mut framer, b"ab").is_empty());
        assert_eq!(framer.len(), 2);
        assert_eq!(texts(&mut framer, b"cd\n"), ["abcd"]);
        assert!(framer.is_empty());
    }

    #[test]
    fn test_empty_lines_dropped() {
        let mut framer = MessageFramer::new("t");
        assert!(texts(&mut framer, b"\n\n\n").is_empty());
        assert!(texts(&mut framer, b"  \r\n\t\n").is_empty());
    }

    #[test]
    fn test_whitespace_trimmed() {
        let mut framer = MessageFramer::new("t");
        assert_eq!(texts(&mut framer, b"  pos: 10 deg \r\n"), ["pos: 10 deg"]);
    }

    #[test]
    fn test_mixed_complete_and_partial() {
        let mut framer = MessageFramer::new("t");
        assert_eq!(texts(&mut framer, b"one\ntw"), ["one"]);
        assert_eq!(framer.len(), 2);
        assert_eq!(texts(&mut framer, b"o\n"), ["two"]);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut framer = MessageFramer::new("t");
        let mut all = Vec::new();
        for byte in b"status:45.0\xC2\xB0\nok\n" {
            all.extend(texts(&mut framer, &[*byte]));
        }
        assert_eq!(all, ["status:45.0°", "ok"]);
        assert!(framer.take_warnings().is_empty());
    }

    #[test]
    fn test_invalid_utf8_substituted_with_warning() {
        let mut framer = MessageFramer::new("t");
        let out = texts(&mut framer, b"bad\xFFbyte\nnext\n");

        assert_eq!(out, ["bad\u{FFFD}byte", "next"]);
        let warnings = framer.take_warnings();
        assert_eq!(warnings.len(), 1);
        assert!(matches!(&warnings[0], DecodeWarning::InvalidUtf8 { lossy } if lossy.contains("byte")));
        assert!(framer.take_warnings().is_empty());
    }

    #[test]
    fn test_unconsumed_lines_survive_until_next_feed() {
        let mut framer = MessageFramer::new("t");
        {
            let mut iter = framer.feed(b"a\nb\n");
            assert_eq!(iter.next().map(|m| m.text).as_deref(), Some("a"));
        }
        assert_eq!(texts(&mut framer, b"c\n"), ["b", "c"]);
    }

    #[test]
    fn test_overlong_line_discarded() {
        let mut framer = MessageFramer::with_max_line_length("t", 8);

        assert!(texts(&mut framer, b"0123456789").is_empty());
        assert!(framer.is_empty());
        assert_eq!(texts(&mut framer, b"abc\nok\n"), ["ok"]);

        let warnings = framer.take_warnings();
        assert_eq!(warnings.len(), 2);
        assert!(warnings
            .iter()
            .all(|w| matches!(w, DecodeWarning::LineTooLong { .. })));
    }

    #[test]
    fn test_overlong_line_in_single_feed() {
        let mut framer = MessageFramer::with_max_line_length("t", 4);
        assert_eq!(texts(&mut framer, b"toolong\nfine\n"), ["fine"]);
    }

    #[test]
    fn test_clear_resets_state() {
        let mut framer = MessageFramer::new("t");
        assert!(texts(&mut framer, b"partial").is_empty());
        framer.clear();
        assert!(framer.is_empty());
        assert_eq!(texts(&mut framer, b"x\n"), ["x"]);
    }

    #[test]
    fn test_peer_label_stamped() {
        let mut framer = MessageFramer::new("10.0.0.7:5000");
        let msg = framer.feed(b"hi\n").next().unwrap();
        assert_eq!(&*msg.peer, "10.0.0.7:5000");
    }
}
