//! Tumbler Link: command and telemetry plumbing for a two-wheeled robot
//!
//! This library defines the fixed command and telemetry frames exchanged
//! between a controller and the robot, encodes them as compact binary or
//! comma-separated ASCII, moves them over an addressed bus or a serial
//! stream, and bridges the stream to a TCP line protocol for remote control.
pub mod bridge;
pub mod core;
pub mod protocol;
pub mod transport;
pub mod util;

// Re-export commonly used items
pub use crate::core::{Config, Error, Result};
pub use crate::protocol::{CommandFrame, MotionCommand, TelemetryFrame, TelemetrySchema};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
