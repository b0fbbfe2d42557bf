use std::io;
use thiserror::Error;

use crate::bridge::ProtocolError;

/// Custom error types for the robot link
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Malformed numeral text, field count mismatch or over-long line
    #[error("Format error: {0}")]
    Format(String),

    /// Opcode byte outside the motion command domain
    #[error("Range error: opcode {0} is not a valid motion command")]
    Range(u8),

    /// Fewer bytes were available than the frame requires
    #[error("Transport error: expected {expected} bytes, got {available}")]
    Transport { expected: usize, available: usize },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Disconnected: {0}")]
    Disconnected(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serial error: {0}")]
    Serial(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new format error
    pub fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    /// Creates a new transport error for a short read
    pub fn transport(expected: usize, available: usize) -> Self {
        Error::Transport { expected, available }
    }

    /// Creates a new disconnect error
    pub fn disconnected(msg: impl Into<String>) -> Self {
        Error::Disconnected(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new serial device error
    pub fn serial(msg: impl Into<String>) -> Self {
        Error::Serial(msg.into())
    }

    /// Returns whether the control loop may carry on after this error.
    ///
    /// Bad input and short reads are absorbed; only setup failures are fatal.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Error::Config(_) | Error::Serial(_))
    }
}

impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        Error::Serial(err.to_string())
    }
}
