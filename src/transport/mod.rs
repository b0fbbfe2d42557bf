//! Transport adapters
//!
//! Moves encoded frames over the two physical links: an addressed,
//! half-duplex bus and an ordered point-to-point byte stream.

pub mod bus;
pub mod stream;

pub use self::bus::{Bus, BusAdapter};
#[cfg(target_os = "linux")]
pub use self::bus::LinuxI2cBus;
pub use self::stream::{open_serial, StreamAdapter};

use crate::core::Error;

/// Counters kept by each adapter so absorbed failures stay observable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    /// Malformed numerals, short ASCII parses, over-long lines
    pub format_errors: u64,
    /// Opcodes outside the command domain
    pub range_errors: u64,
    /// Fewer bytes than a frame needs
    pub transport_errors: u64,
}

impl LinkStats {
    /// Counts an error against its category
    pub fn record(&mut self, err: &Error) {
        match err {
            Error::Format(_) => self.format_errors += 1,
            Error::Range(_) => self.range_errors += 1,
            Error::Transport { .. } => self.transport_errors += 1,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_record() {
        let mut stats = LinkStats::default();
        stats.record(&Error::format("x"));
        stats.record(&Error::Range(5));
        stats.record(&Error::transport(7, 2));
        stats.record(&Error::transport(4, 0));
        stats.record(&Error::disconnected("eof"));
        assert_eq!(stats.format_errors, 1);
        assert_eq!(stats.range_errors, 1);
        assert_eq!(stats.transport_errors, 2);
        assert_eq!(stats.frames_received, 0);
    }
}
