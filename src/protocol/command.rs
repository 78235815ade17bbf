//! Motor command encoding and validation.
//!
//! Every command is a single ASCII line: a one-letter opcode followed by an
//! optional numeric argument.
//!
//! | Command        | Wire        |
//! |----------------|-------------|
//! | absolute move  | `a<deg>`    |
//! | relative move  | `r<±deg>`   |
//! | reset          | `z`         |
//! | status query   | `s`         |
//! | power toggle   | `p`         |
//! | speed          | `v<1-5>`    |
//! | help           | `h`         |
//!
//! Arguments are checked when a [`Command`] is built, so an encoded command
//! is always well-formed. [`validate`] is the boundary check for raw text
//! typed by an operator; it only looks at the opcode.

use std::fmt;
use std::str::FromStr;

use crate::error::{LinkError, Result};

/// Opcodes accepted by the controller.
pub const OPCODES: [char; 7] = ['a', 'r', 'z', 's', 'p', 'v', 'h'];

/// Slowest speed level.
pub const MIN_SPEED: u8 = 1;

/// Fastest speed level.
pub const MAX_SPEED: u8 = 5;

/// A finite angle in degrees.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Degrees(f64);

impl Degrees {
    /// Create an angle, rejecting NaN and infinities.
    pub fn new(value: f64) -> Result<Self> {
        if value.is_finite() {
            Ok(Self(value))
        } else {
            Err(LinkError::InvalidArgument(format!(
                "angle must be finite, got {value}"
            )))
        }
    }

    /// The angle value.
    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

/// Speed level in `1..=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpeedLevel(u8);

impl SpeedLevel {
    /// Create a speed level, rejecting values outside `1..=5`.
    pub fn new(level: u8) -> Result<Self> {
        if (MIN_SPEED..=MAX_SPEED).contains(&level) {
            Ok(Self(level))
        } else {
            Err(LinkError::InvalidArgument(format!(
                "speed level must be in {MIN_SPEED}..={MAX_SPEED}, got {level}"
            )))
        }
    }

    /// The level value.
    #[inline]
    pub fn get(self) -> u8 {
        self.0
    }
}

/// A typed request to the controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Move to an absolute angle.
    AbsoluteMove(Degrees),
    /// Rotate by a signed angle from the current position.
    RelativeMove(Degrees),
    /// Declare the current position to be zero.
    Reset,
    /// Ask for a status report.
    StatusQuery,
    /// Toggle the driver's power-saving mode.
    PowerToggle,
    /// Change the step speed.
    SetSpeed(SpeedLevel),
    /// Ask the controller to print its help text.
    Help,
}

impl Command {
    /// Build an absolute move.
    pub fn absolute_move(degrees: f64) -> Result<Self> {
        Degrees::new(degrees).map(Self::AbsoluteMove)
    }

    /// Build a relative move.
    pub fn relative_move(degrees: f64) -> Result<Self> {
        Degrees::new(degrees).map(Self::RelativeMove)
    }

    /// Build a speed change.
    pub fn set_speed(level: u8) -> Result<Self> {
        SpeedLevel::new(level).map(Self::SetSpeed)
    }

    /// Encode to wire text, without the line terminator.
    pub fn encode(&self) -> String {
        match self {
            Self::AbsoluteMove(d) => format!("a{}", d.get()),
            Self::RelativeMove(d) => format!("r{}", d.get()),
            Self::Reset => "z".to_string(),
            Self::StatusQuery => "s".to_string(),
            Self::PowerToggle => "p".to_string(),
            Self::SetSpeed(level) => format!("v{}", level.get()),
            Self::Help => "h".to_string(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Command {
    type Err = LinkError;

    /// Parse the same tokens an operator would type: `a90`, `r-30`, `v3`, `S`.
    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        if !validate(text) {
            return Err(LinkError::InvalidCommand(s.to_string()));
        }

        let mut chars = text.chars();
        let opcode = chars.next().map(|c| c.to_ascii_lowercase());
        let arg = chars.as_str().trim();

        let bare = |cmd: Command| {
            if arg.is_empty() {
                Ok(cmd)
            } else {
                Err(LinkError::InvalidCommand(s.to_string()))
            }
        };
        let angle = || {
            arg.parse::<f64>()
                .map_err(|_| LinkError::InvalidArgument(format!("bad angle {arg:?}")))
        };

        match opcode {
            Some('a') => Self::absolute_move(angle()?),
            Some('r') => Self::relative_move(angle()?),
            Some('v') => {
                let level = arg
                    .parse::<u8>()
                    .map_err(|_| LinkError::InvalidArgument(format!("bad speed {arg:?}")))?;
                Self::set_speed(level)
            }
            Some('z') => bare(Self::Reset),
            Some('s') => bare(Self::StatusQuery),
            Some('p') => bare(Self::PowerToggle),
            Some('h') => bare(Self::Help),
            _ => Err(LinkError::InvalidCommand(s.to_string())),
        }
    }
}

/// Shallow grammar check for raw command text.
///
/// A line is valid if it is non-empty after trimming and starts with one of
/// the known opcodes (case-insensitive). Numeric payloads are not checked.
pub fn validate(raw: &str) -> bool {
    raw.trim()
        .chars()
        .next()
        .map(|c| OPCODES.contains(&c.to_ascii_lowercase()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<Command> {
        vec![
            Command::absolute_move(90.0).unwrap(),
            Command::relative_move(-30.5).unwrap(),
            Command::Reset,
            Command::StatusQuery,
            Command::PowerToggle,
            Command::set_speed(3).unwrap(),
            Command::Help,
        ]
    }

    #[test]
    fn test_encode_tokens() {
        let encoded: Vec<String> = all_variants().iter().map(Command::encode).collect();
        assert_eq!(encoded, ["a90", "r-30.5", "z", "s", "p", "v3", "h"]);
    }

    #[test]
    fn test_encoded_commands_validate() {
        for cmd in all_variants() {
            assert!(validate(&cmd.encode()), "{cmd:?} failed validation");
        }
    }

    #[test]
    fn test_speed_bounds() {
        assert!(matches!(
            Command::set_speed(0),
            Err(LinkError::InvalidArgument(_))
        ));
        assert!(matches!(
            Command::set_speed(6),
            Err(LinkError::InvalidArgument(_))
        ));
        for level in 1..=5 {
            assert_eq!(Command::set_speed(level).unwrap().encode(), format!("v{level}"));
        }
    }

    #[test]
    fn test_non_finite_angles_rejected() {
        assert!(Command::absolute_move(f64::NAN).is_err());
        assert!(Command::relative_move(f64::INFINITY).is_err());
        assert!(Command::absolute_move(f64::NEG_INFINITY).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(validate("a90"));
        assert!(validate("  S  "));
        assert!(validate("Help"));
        assert!(!validate(""));
        assert!(!validate("   "));
        assert!(!validate("x1"));
        assert!(!validate("9a"));
    }

    #[test]
    fn test_parse() {
        assert_eq!("a90".parse::<Command>().unwrap(), Command::absolute_move(90.0).unwrap());
        assert_eq!("R-30".parse::<Command>().unwrap(), Command::relative_move(-30.0).unwrap());
        assert_eq!(" v5 ".parse::<Command>().unwrap(), Command::set_speed(5).unwrap());
        assert_eq!("z".parse::<Command>().unwrap(), Command::Reset);
        assert_eq!("S".parse::<Command>().unwrap(), Command::StatusQuery);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!("q".parse::<Command>(), Err(LinkError::InvalidCommand(_))));
        assert!(matches!("zz".parse::<Command>(), Err(LinkError::InvalidCommand(_))));
        assert!(matches!("v9".parse::<Command>(), Err(LinkError::InvalidArgument(_))));
        assert!(matches!("aabc".parse::<Command>(), Err(LinkError::InvalidArgument(_))));
        assert!(matches!("a".parse::<Command>(), Err(LinkError::InvalidArgument(_))));
    }

    #[test]
    fn test_display_matches_encode() {
        let cmd = Command::relative_move(45.0).unwrap();
        assert_eq!(cmd.to_string(), "r45");
    }
}
