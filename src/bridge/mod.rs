//! TCP line-protocol bridge
//!
//! Relays telemetry from the robot's stream link to one remote peer and
//! turns the peer's text requests into command frames.

pub mod command;
pub mod relay;
pub mod remote;

pub use self::command::{ProtocolError, RemoteRequest};
pub use self::relay::{Relay, TickReport};
pub use self::remote::{RemoteListener, RemotePeer, TcpPeer, TcpRemoteListener};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a remote peer is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgeState {
    #[default]
    Disconnected,
    Connected,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeState::Disconnected => write!(f, "disconnected"),
            BridgeState::Connected => write!(f, "connected"),
        }
    }
}

/// What the bridge does with a request whose verb it does not know
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownVerbPolicy {
    /// Log and count it, send nothing back
    #[default]
    Drop,
    /// Also answer with an `ERROR:` line
    Acknowledge,
}

/// Relay counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub connections: u64,
    pub disconnects: u64,
    pub telemetry_forwarded: u64,
    /// Telemetry lines that could not be read or parsed
    pub telemetry_failures: u64,
    pub commands_forwarded: u64,
    pub command_failures: u64,
    /// Known verbs with a missing or unusable argument
    pub protocol_errors: u64,
    pub unknown_verbs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_serde() {
        let policy: UnknownVerbPolicy = serde_json::from_str("\"acknowledge\"").unwrap();
        assert_eq!(policy, UnknownVerbPolicy::Acknowledge);
        assert_eq!(serde_json::to_string(&UnknownVerbPolicy::Drop).unwrap(), "\"drop\"");
        assert_eq!(UnknownVerbPolicy::default(), UnknownVerbPolicy::Drop);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(BridgeState::default().to_string(), "disconnected");
        assert_eq!(BridgeState::Connected.to_string(), "connected");
    }
}
