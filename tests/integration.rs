//! Integration tests for motorlink.
//!
//! These tests verify the protocol pieces together: framing, command
//! encoding, and notification parsing.

use std::sync::Arc;

use motorlink::protocol::{
    extract_angle, validate, Command, DecodeWarning, Message, MessageFramer,
};
use motorlink::{LinkError, NotificationDispatcher};
use proptest::prelude::*;

fn frame_all(chunks: &[&[u8]]) -> Vec<String> {
    let mut framer = MessageFramer::new("test");
    let mut out = Vec::new();
    for chunk in chunks {
        out.extend(framer.feed(chunk).map(|m| m.text));
    }
    out
}

/// Status stream as the controller sends it, split across radio notifications.
#[test]
fn test_controller_status_stream() {
    let texts = frame_all(&[
        b"Motor ready\r\nangle: 0",
        b".0 deg\nstatus:45",
        b".0\xC2\xB0\n\n",
    ]);
    assert_eq!(texts, ["Motor ready", "angle: 0.0 deg", "status:45.0°"]);

    let angles: Vec<Option<f64>> = texts.iter().map(|t| extract_angle(t)).collect();
    assert_eq!(angles, [None, Some(0.0), Some(45.0)]);
}

/// Empty lines produce nothing.
#[test]
fn test_empty_lines_suppressed() {
    assert!(frame_all(&[b"\n\n\n"]).is_empty());
    assert!(frame_all(&[b"  \r\n\t\n"]).is_empty());
}

/// A partial fragment is kept until its newline arrives.
#[test]
fn test_partial_fragment_retained() {
    let mut framer = MessageFramer::new("test");
    assert_eq!(framer.feed(b"ab").count(), 0);
    assert_eq!(framer.len(), 2);

    let texts: Vec<String> = framer.feed(b"cd\n").map(|m| m.text).collect();
    assert_eq!(texts, ["abcd"]);
    assert!(framer.is_empty());
}

/// Invalid UTF-8 is replaced and reported, and later lines still arrive.
#[test]
fn test_invalid_utf8_is_not_fatal() {
    let mut framer = MessageFramer::new("test");
    let texts: Vec<String> = framer.feed(b"ok\xFF\nnext\n").map(|m| m.text).collect();

    assert_eq!(texts, ["ok\u{FFFD}", "next"]);
    let warnings = framer.take_warnings();
    assert_eq!(warnings.len(), 1);
    assert!(matches!(warnings[0], DecodeWarning::InvalidUtf8 { .. }));
}

/// Every command encodes to text the grammar check accepts.
#[test]
fn test_encoded_commands_validate() {
    let commands = [
        Command::absolute_move(90.0).unwrap(),
        Command::absolute_move(-0.25).unwrap(),
        Command::relative_move(-30.5).unwrap(),
        Command::Reset,
        Command::StatusQuery,
        Command::PowerToggle,
        Command::set_speed(1).unwrap(),
        Command::set_speed(5).unwrap(),
        Command::Help,
    ];
    for command in commands {
        let wire = command.encode();
        assert!(validate(&wire), "{wire}");
        assert_eq!(wire.parse::<Command>().unwrap(), command);
    }
}

/// Speed levels outside 1..=5 are rejected at construction.
#[test]
fn test_speed_bounds() {
    for level in [0u8, 6, 255] {
        assert!(matches!(
            Command::set_speed(level),
            Err(LinkError::InvalidArgument(_))
        ));
    }
    for level in 1u8..=5 {
        assert_eq!(Command::set_speed(level).unwrap().encode(), format!("v{level}"));
    }
}

/// Angle extraction follows the last `:` field before the marker.
#[test]
fn test_angle_extraction() {
    assert_eq!(extract_angle("angle: 123.4 deg"), Some(123.4));
    assert_eq!(extract_angle("status:45.0°"), Some(45.0));
    assert_eq!(extract_angle("Motor ready"), None);
    assert_eq!(extract_angle("pos: 1: -7.5 deg"), Some(-7.5));
    assert_eq!(extract_angle("angle: unknown deg"), None);
}

/// Framed messages reach subscribers with their angle intact.
#[test]
fn test_framer_into_dispatcher() {
    let dispatcher = NotificationDispatcher::new();
    let angles = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = angles.clone();
    dispatcher.subscribe(move |m: &Message| {
        if let Some(angle) = m.angle() {
            sink.lock().unwrap().push(angle);
        }
    });

    let mut framer = MessageFramer::new("bench");
    for message in framer.feed(b"angle: 10 deg\nnoise\nangle: 20 deg\n") {
        dispatcher.dispatch(&message);
    }
    assert_eq!(*angles.lock().unwrap(), [10.0, 20.0]);
}

fn frame_with_warnings(chunks: &[&[u8]]) -> (Vec<String>, usize) {
    let mut framer = MessageFramer::new("test");
    let mut texts = Vec::new();
    let mut warnings = 0;
    for chunk in chunks {
        texts.extend(framer.feed(chunk).map(|m| m.text));
        warnings += framer.take_warnings().len();
    }
    (texts, warnings)
}

fn split_at_points<'a>(stream: &'a [u8], cuts: &[prop::sample::Index]) -> Vec<&'a [u8]> {
    let mut points: Vec<usize> = cuts.iter().map(|c| c.index(stream.len() + 1)).collect();
    points.sort_unstable();
    let mut chunks = Vec::new();
    let mut start = 0;
    for point in points {
        chunks.push(&stream[start..point]);
        start = point;
    }
    chunks.push(&stream[start..]);
    chunks
}

/// Raw line bodies: arbitrary bytes, or text with multi-byte characters.
fn body_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>().prop_filter("no delimiter", |b| *b != b'\n'), 0..24),
        "[a-z ]{0,4}[°µ€é]{1,4}[a-z0-9 ]{0,4}".prop_map(String::into_bytes),
    ]
}

fn line_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z0-9 :.]{0,24}",
        "angle: -?[0-9]{1,3}\\.[0-9] deg",
        "[ \t]{0,3}",
    ]
}

proptest! {
    /// Feeding bytes in one call or split anywhere yields the same messages.
    #[test]
    fn prop_chunk_boundary_independence(
        lines in prop::collection::vec(line_strategy(), 0..12),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
    ) {
        let stream: Vec<u8> = lines.iter().flat_map(|l| format!("{l}\n").into_bytes()).collect();
        let whole = frame_all(&[&stream]);

        let chunks = split_at_points(&stream, &cuts);

        prop_assert_eq!(frame_all(&chunks), whole.clone());

        let expected: Vec<String> = lines
            .iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        prop_assert_eq!(whole, expected);
    }

    /// Split multi-byte characters and invalid bytes frame the same as a
    /// single feed, with the same warnings.
    #[test]
    fn prop_chunk_boundary_independence_raw_bytes(
        bodies in prop::collection::vec(body_strategy(), 0..12),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
    ) {
        let stream: Vec<u8> = bodies
            .iter()
            .flat_map(|b| b.iter().copied().chain(std::iter::once(b'\n')))
            .collect();
        let (whole, whole_warnings) = frame_with_warnings(&[&stream]);

        let chunks = split_at_points(&stream, &cuts);
        let (split, split_warnings) = frame_with_warnings(&chunks);
        prop_assert_eq!(&split, &whole);
        prop_assert_eq!(split_warnings, whole_warnings);

        let expected: Vec<String> = bodies
            .iter()
            .map(|b| String::from_utf8_lossy(b).trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        let invalid = bodies.iter().filter(|b| std::str::from_utf8(b).is_err()).count();
        prop_assert_eq!(whole, expected);
        prop_assert_eq!(whole_warnings, invalid);
    }

    /// Any text starting with an opcode passes the grammar check.
    #[test]
    fn prop_validate_accepts_opcode_prefix(op in "[arzspvhARZSPVH]", rest in "[ -~]{0,10}") {
        let line = format!("{op}{rest}");
        prop_assert!(validate(&line));
    }
}
