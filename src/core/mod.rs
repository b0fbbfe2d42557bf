//! Core types for the robot link
//!
//! Error taxonomy and node configuration shared by every other module.

pub mod error;
pub mod serde;
pub mod types;

pub use self::error::{Error, Result};
pub use self::types::{BridgeConfig, BusConfig, Config, SerialConfig};

/// Default TCP port of the remote line protocol
pub const DEFAULT_PORT: u16 = 12345;

/// Default bus address agreed out-of-band by controller and robot
pub const DEFAULT_BUS_ADDRESS: u8 = 8;
