use thiserror::Error;

use crate::protocol::{CommandFrame, MotionCommand};

/// Remote protocol violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty request")]
    Empty,

    /// A known verb arrived without its integer argument
    #[error("Invalid {0} command: missing value")]
    MissingPayload(&'static str),

    /// A known verb arrived with an argument that is not a 16-bit integer
    #[error("Invalid {verb} command: bad value {value:?}")]
    InvalidPayload { verb: &'static str, value: String },

    #[error("Unknown command {0:?}")]
    UnknownVerb(String),
}

impl ProtocolError {
    /// Error line sent back to the remote peer, without terminator
    pub fn reply(&self) -> String {
        format!("ERROR: {}", self)
    }
}

/// One parsed line of the remote control protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteRequest {
    /// `GET_DATA`: latest telemetry, out of band of the periodic stream
    GetData,
    /// `MOVE <int>`
    Move(i16),
    /// `TURN <int>`, degrees
    Turn(i16),
    /// `STOP`
    Stop,
}

impl RemoteRequest {
    /// Parses one line. Surrounding whitespace is ignored; verbs are
    /// case-sensitive and separated from their argument by whitespace.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtocolError::Empty);
        }

        let (verb, payload) = match line.split_once(char::is_whitespace) {
            Some((verb, payload)) => (verb, payload.trim()),
            None => (line, ""),
        };

        match verb {
            "GET_DATA" => Ok(RemoteRequest::GetData),
            "STOP" => Ok(RemoteRequest::Stop),
            "MOVE" => parse_value("MOVE", payload).map(RemoteRequest::Move),
            "TURN" => parse_value("TURN", payload).map(RemoteRequest::Turn),
            other => Err(ProtocolError::UnknownVerb(other.to_string())),
        }
    }

    /// Command frame to forward for this request, if any.
    ///
    /// Relay-originated frames leave `speed` at 0.
    pub fn to_command(&self) -> Option<CommandFrame> {
        match *self {
            RemoteRequest::GetData => None,
            RemoteRequest::Move(value) => Some(CommandFrame::new(MotionCommand::Move, value, 0)),
            RemoteRequest::Turn(value) => Some(CommandFrame::new(MotionCommand::Rotate, value, 0)),
            RemoteRequest::Stop => Some(CommandFrame::stop()),
        }
    }
}

fn parse_value(verb: &'static str, payload: &str) -> Result<i16, ProtocolError> {
    if payload.is_empty() {
        return Err(ProtocolError::MissingPayload(verb));
    }
    payload.parse().map_err(|_| ProtocolError::InvalidPayload {
        verb,
        value: payload.to_string(),
    })
}
