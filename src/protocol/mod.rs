//! Frame model and wire encodings
//!
//! This module defines the command and telemetry frames exchanged between the
//! controller and the robot, and the two interchangeable encodings for them:
//! a fixed-width little-endian binary layout and comma-separated ASCII.

pub mod ascii;
pub mod codec;
pub mod frame;

pub use self::ascii::{AsciiCodec, Decoded};
pub use self::codec::{BinaryCodec, BinaryFrame};
pub use self::frame::{
    CommandFrame, MotionCommand, TelemetryFrame, TelemetrySchema, INVALID_COMMAND_NAME,
};

// Constants
/// Longest ASCII line accepted, excluding the terminator
pub const MAX_LINE_LENGTH: usize = 64;

/// Separator between ASCII fields
pub const FIELD_DELIMITER: char = ',';

/// Terminator of an ASCII line on stream transports
pub const LINE_TERMINATOR: char = '\n';
