//! Inbound message type and notification parsing.

use std::sync::Arc;
use std::time::SystemTime;

/// Markers that follow an angle value in a status notification.
const ANGLE_MARKERS: [&str; 2] = ["deg", "°"];

/// A decoded line received from a peer.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Line text, trimmed, without the delimiter.
    pub text: String,
    /// Peer the line came from.
    pub peer: Arc<str>,
    /// When the line was framed.
    pub received_at: SystemTime,
}

impl Message {
    /// Create a message stamped with the current time.
    pub fn new(text: impl Into<String>, peer: Arc<str>) -> Self {
        Self {
            text: text.into(),
            peer,
            received_at: SystemTime::now(),
        }
    }

    /// Angle reported by this line, if it is an angle-bearing status update.
    #[inline]
    pub fn angle(&self) -> Option<f64> {
        extract_angle(&self.text)
    }
}

/// Extract the current angle from a status line.
///
/// Finds the first `deg` or `°` marker, takes the text before it, and parses
/// the last `:`-separated field as a number. Lines like `angle: 123.4 deg`
/// and `status:45.0°` both qualify. With several colon fields before the
/// marker, only the last one is considered.
pub fn extract_angle(line: &str) -> Option<f64> {
    let marker = ANGLE_MARKERS.iter().find(|m| line.contains(**m))?;
    let before = line.split(*marker).next()?;
    let field = before.rsplit(':').next()?.trim();
    field.parse().ok()
}
