use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Motion directive carried by a command frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MotionCommand {
    /// Halt both wheels
    Stop,
    /// Drive forward/backward by `value`
    Move,
    /// Turn in place by `value` degrees
    Rotate,
    /// Any code or token outside the three above. Never transmitted.
    #[default]
    Invalid,
}

/// Name reported for anything that is not a known command
pub const INVALID_COMMAND_NAME: &str = "INVALID";

impl MotionCommand {
    /// Checked constructor from a wire opcode.
    ///
    /// Returns the command and whether the opcode was inside the domain.
    pub fn from_opcode(opcode: u8) -> (Self, bool) {
        match opcode {
            0 => (MotionCommand::Stop, true),
            1 => (MotionCommand::Move, true),
            2 => (MotionCommand::Rotate, true),
            _ => (MotionCommand::Invalid, false),
        }
    }

    /// Wire opcode, `None` for `Invalid`
    pub fn opcode(&self) -> Option<u8> {
        match self {
            MotionCommand::Stop => Some(0),
            MotionCommand::Move => Some(1),
            MotionCommand::Rotate => Some(2),
            MotionCommand::Invalid => None,
        }
    }

    /// Exact, case-sensitive name lookup; unknown names map to `Invalid`
    pub fn from_name(name: &str) -> Self {
        match name {
            "Stop" => MotionCommand::Stop,
            "Move" => MotionCommand::Move,
            "Rotate" => MotionCommand::Rotate,
            _ => MotionCommand::Invalid,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MotionCommand::Stop => "Stop",
            MotionCommand::Move => "Move",
            MotionCommand::Rotate => "Rotate",
            MotionCommand::Invalid => INVALID_COMMAND_NAME,
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, MotionCommand::Invalid)
    }
}

impl TryFrom<u8> for MotionCommand {
    type Error = Error;

    fn try_from(opcode: u8) -> Result<Self> {
        match MotionCommand::from_opcode(opcode) {
            (command, true) => Ok(command),
            (_, false) => Err(Error::Range(opcode)),
        }
    }
}

impl FromStr for MotionCommand {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(MotionCommand::from_name(s))
    }
}

impl fmt::Display for MotionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One motion directive, created right before transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandFrame {
    pub command: MotionCommand,
    /// Distance or angle, depending on the command
    pub value: i16,
    pub speed: u8,
}

impl CommandFrame {
    pub fn new(command: MotionCommand, value: i16, speed: u8) -> Self {
        CommandFrame {
            command,
            value,
            speed,
        }
    }

    pub fn stop() -> Self {
        CommandFrame::new(MotionCommand::Stop, 0, 0)
    }

    pub fn is_valid(&self) -> bool {
        self.command.is_valid()
    }

    /// Opcode of this frame, or a range error for `Invalid`
    pub fn opcode(&self) -> Result<u8> {
        self.command.opcode().ok_or(Error::Range(u8::MAX))
    }

    /// Passes valid frames through, rejects `Invalid` ones
    pub fn validate(self) -> Result<Self> {
        self.opcode().map(|_| self)
    }
}

impl fmt::Display for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.command, self.value, self.speed)
    }
}

/// Which telemetry fields a given encoding carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetrySchema {
    /// yaw, distance, ultrasonic. The only layout the binary codec knows.
    Minimal,
    /// Minimal plus both IR flags and both wheel encoders
    Extended,
}

impl TelemetrySchema {
    pub fn field_count(&self) -> usize {
        match self {
            TelemetrySchema::Minimal => 3,
            TelemetrySchema::Extended => 7,
        }
    }

    pub fn from_field_count(count: usize) -> Option<Self> {
        match count {
            3 => Some(TelemetrySchema::Minimal),
            7 => Some(TelemetrySchema::Extended),
            _ => None,
        }
    }
}

/// Sensor report sent from the robot to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TelemetryFrame {
    pub yaw_degrees: i16,
    pub distance_cm: i32,
    pub ultrasonic_distance_cm: u8,
    pub left_ir_detected: bool,
    pub right_ir_detected: bool,
    pub left_encoder: i32,
    pub right_encoder: i32,
}

impl TelemetryFrame {
    /// Frame populated with the minimal-schema fields only
    pub fn minimal(yaw_degrees: i16, distance_cm: i32, ultrasonic_distance_cm: u8) -> Self {
        TelemetryFrame {
            yaw_degrees,
            distance_cm,
            ultrasonic_distance_cm,
            ..TelemetryFrame::default()
        }
    }

    /// Copy with the fields `schema` does not carry reset to zero
    pub fn project(&self, schema: TelemetrySchema) -> Self {
        match schema {
            TelemetrySchema::Minimal => TelemetryFrame::minimal(
                self.yaw_degrees,
                self.distance_cm,
                self.ultrasonic_distance_cm,
            ),
            TelemetrySchema::Extended => *self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: [MotionCommand; 3] = [
        MotionCommand::Stop,
        MotionCommand::Move,
        MotionCommand::Rotate,
    ];

    #[test]
    fn test_name_roundtrip() {
        for command in VALID {
            assert_eq!(MotionCommand::from_name(command.name()), command);
            let name = MotionCommand::from_name(command.name()).name();
            assert_eq!(name, command.name());
        }
    }

    #[test]
    fn test_unknown_names_are_invalid() {
        for name in ["stop", "MOVE", "Rotate ", "", "INVALID", "Turn"] {
            assert_eq!(MotionCommand::from_name(name), MotionCommand::Invalid);
        }
        assert_eq!(MotionCommand::Invalid.to_string(), INVALID_COMMAND_NAME);
        assert_eq!("Move".parse::<MotionCommand>().unwrap(), MotionCommand::Move);
    }

    #[test]
    fn test_opcode_domain() {
        for opcode in 0..=u8::MAX {
            let (command, valid) = MotionCommand::from_opcode(opcode);
            assert_eq!(valid, opcode < 3);
            if valid {
                assert_eq!(command.opcode(), Some(opcode));
            } else {
                assert_eq!(command, MotionCommand::Invalid);
                assert!(matches!(MotionCommand::try_from(opcode), Err(Error::Range(o)) if o == opcode));
            }
        }
        assert_eq!(MotionCommand::Invalid.opcode(), None);
    }

    #[test]
    fn test_command_frame_validate() {
        let frame = CommandFrame::new(MotionCommand::Rotate, -90, 40);
        assert_eq!(frame.validate().unwrap(), frame);
        assert_eq!(frame.to_string(), "Rotate,-90,40");

        let invalid = CommandFrame::default();
        assert!(!invalid.is_valid());
        assert!(matches!(invalid.validate(), Err(Error::Range(_))));
    }

    #[test]
    fn test_schema_projection() {
        let frame = TelemetryFrame {
            yaw_degrees: -12,
            distance_cm: 3400,
            ultrasonic_distance_cm: 80,
            left_ir_detected: true,
            right_ir_detected: false,
            left_encoder: 1200,
            right_encoder: -1180,
        };
        assert_eq!(
            frame.project(TelemetrySchema::Minimal),
            TelemetryFrame::minimal(-12, 3400, 80)
        );
        assert_eq!(frame.project(TelemetrySchema::Extended), frame);
        assert_eq!(TelemetrySchema::from_field_count(3), Some(TelemetrySchema::Minimal));
        assert_eq!(TelemetrySchema::from_field_count(7), Some(TelemetrySchema::Extended));
        assert_eq!(TelemetrySchema::from_field_count(5), None);
    }
}
