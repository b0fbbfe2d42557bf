use bytes::BytesMut;
use tracing::{debug, warn};

use super::LinkStats;
use crate::core::{Error, Result};
use crate::protocol::{AsciiCodec, BinaryFrame, CommandFrame, MotionCommand, TelemetryFrame};

/// Master/target primitives of a polled, addressed bus.
///
/// Writes are queued between `begin_transmission` and `end_transmission`.
/// Reads are served from a receive buffer filled by `request_from` on the
/// master, or by the incoming transmission on the target.
pub trait Bus {
    /// Starts queueing a transmission to `address`
    fn begin_transmission(&mut self, address: u8);

    /// Queues bytes, returning how many were accepted
    fn write(&mut self, bytes: &[u8]) -> usize;

    /// Puts the queued transmission on the bus
    fn end_transmission(&mut self) -> Result<()>;

    /// Asks `address` for `count` bytes; returns how many arrived
    fn request_from(&mut self, address: u8, count: usize) -> Result<usize>;

    /// Bytes waiting in the receive buffer
    fn available(&self) -> usize;

    /// Reads at most `buf.len()` buffered bytes
    fn read(&mut self, buf: &mut [u8]) -> usize;
}

/// Frame-level operations over an addressed bus.
///
/// No operation retries; a short read is counted, logged and returned as
/// [`Error::Transport`].
pub struct BusAdapter<B> {
    bus: B,
    /// Target address agreed out-of-band
    address: u8,
    ascii: AsciiCodec,
    stats: LinkStats,
}

impl<B: Bus> BusAdapter<B> {
    pub fn new(bus: B, address: u8, ascii: AsciiCodec) -> Self {
        BusAdapter {
            bus,
            address,
            ascii,
            stats: LinkStats::default(),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn get_ref(&self) -> &B {
        &self.bus
    }

    pub fn get_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    fn fail<T>(&mut self, err: Error) -> Result<T> {
        self.stats.record(&err);
        Err(err)
    }

    fn transmit(&mut self, bytes: &[u8]) -> Result<()> {
        self.bus.begin_transmission(self.address);
        let written = self.bus.write(bytes);
        self.bus.end_transmission()?;
        if written < bytes.len() {
            warn!(address = self.address, written, "bus accepted a partial frame");
            return self.fail(Error::transport(bytes.len(), written));
        }
        self.stats.frames_sent += 1;
        Ok(())
    }

    /// Drains whatever is buffered so it cannot leak into the next frame
    fn discard_pending(&mut self) {
        let mut scratch = [0u8; 16];
        while self.bus.available() > 0 {
            if self.bus.read(&mut scratch) == 0 {
                break;
            }
        }
    }

    /// Sends a binary command, opcode first
    pub fn send_command(&mut self, frame: &CommandFrame) -> Result<()> {
        let mut buf = BytesMut::with_capacity(CommandFrame::WIRE_SIZE);
        if let Err(err) = frame.encode(&mut buf) {
            return self.fail(err);
        }
        self.transmit(&buf)?;
        debug!(address = self.address, %frame, "sent bus command");
        Ok(())
    }

    /// Sends `opcode,value,speed` as one transmission, without terminator
    pub fn send_command_ascii(&mut self, frame: &CommandFrame) -> Result<()> {
        let text = match self.ascii.encode_command(frame) {
            Ok(text) => text,
            Err(err) => return self.fail(err),
        };
        self.transmit(text.as_bytes())?;
        debug!(address = self.address, text = %text, "sent bus ascii command");
        Ok(())
    }

    /// Requests exactly one binary telemetry frame from the target
    pub fn read_telemetry(&mut self) -> Result<TelemetryFrame> {
        let expected = TelemetryFrame::WIRE_SIZE;
        self.bus.request_from(self.address, expected)?;

        let available = self.bus.available();
        if available < expected {
            warn!(address = self.address, expected, available, "insufficient bytes received");
            self.discard_pending();
            return self.fail(Error::transport(expected, available));
        }

        let mut buf = [0u8; TelemetryFrame::WIRE_SIZE];
        let read = self.bus.read(&mut buf);
        if read < expected {
            return self.fail(Error::transport(expected, read));
        }
        let frame = TelemetryFrame::decode(&buf)?;
        self.stats.frames_received += 1;
        debug!(address = self.address, ?frame, "read bus telemetry");
        Ok(frame)
    }

    /// Requests one ASCII telemetry reply of up to the maximum line length
    pub fn read_telemetry_ascii(&mut self) -> Result<TelemetryFrame> {
        let text = self.read_text(true)?;
        match self.ascii.decode_telemetry(&text).into_result() {
            Ok(frame) => {
                self.stats.frames_received += 1;
                Ok(frame)
            }
            Err(err) => self.fail(err),
        }
    }

    /// Target side: answers a telemetry request with the binary layout
    pub fn send_telemetry(&mut self, frame: &TelemetryFrame) -> Result<()> {
        let mut buf = BytesMut::with_capacity(TelemetryFrame::WIRE_SIZE);
        frame.encode(&mut buf)?;
        self.reply(&buf)
    }

    /// Target side: answers a telemetry request with the codec's ASCII schema
    pub fn send_telemetry_ascii(&mut self, frame: &TelemetryFrame) -> Result<()> {
        let text = self.ascii.encode_telemetry(frame);
        self.reply(text.as_bytes())
    }

    fn reply(&mut self, bytes: &[u8]) -> Result<()> {
        let written = self.bus.write(bytes);
        if written < bytes.len() {
            return self.fail(Error::transport(bytes.len(), written));
        }
        self.stats.frames_sent += 1;
        Ok(())
    }

    /// Target side: decodes a binary command of `num_bytes` just received.
    ///
    /// The opcode is validated before anything else is read. An opcode
    /// outside the command domain yields an `Invalid` frame and leaves the
    /// remaining bytes unread.
    pub fn receive_command(&mut self, num_bytes: usize) -> Result<CommandFrame> {
        let expected = CommandFrame::WIRE_SIZE;
        if num_bytes < 1 || self.bus.available() < 1 {
            warn!("no command data received");
            return self.fail(Error::transport(expected, 0));
        }

        let mut opcode = [0u8; 1];
        self.bus.read(&mut opcode);
        let (command, valid) = MotionCommand::from_opcode(opcode[0]);
        if !valid {
            warn!(opcode = opcode[0], "invalid command received");
            self.stats.range_errors += 1;
            return Ok(CommandFrame::new(MotionCommand::Invalid, 0, 0));
        }

        let available = self.bus.available();
        if available < expected - 1 {
            warn!(expected, available = available + 1, "insufficient command bytes");
            self.discard_pending();
            return self.fail(Error::transport(expected, available + 1));
        }

        let mut buf = [0u8; CommandFrame::WIRE_SIZE];
        buf[0] = opcode[0];
        self.bus.read(&mut buf[1..]);
        let frame = CommandFrame::decode(&buf)?;
        debug_assert_eq!(frame.command, command);
        self.stats.frames_received += 1;
        debug!(%frame, "received bus command");
        Ok(frame)
    }

    /// Target side: decodes an ASCII command from the receive buffer
    pub fn receive_command_ascii(&mut self) -> Result<CommandFrame> {
        let text = self.read_text(false)?;
        let frame = match self.ascii.decode_command(&text).into_result() {
            Ok(frame) => frame,
            Err(err) => return self.fail(err),
        };
        if !frame.is_valid() {
            self.stats.range_errors += 1;
        }
        self.stats.frames_received += 1;
        Ok(frame)
    }

    /// Collects buffered text, dropping padding and the line terminator
    fn read_text(&mut self, request: bool) -> Result<String> {
        let limit = self.ascii.max_line_length();
        if request {
            self.bus.request_from(self.address, limit)?;
        }

        let mut buf = vec![0u8; limit.min(self.bus.available())];
        let read = self.bus.read(&mut buf);
        buf.truncate(read);
        self.discard_pending();

        let end = buf
            .iter()
            .position(|b| matches!(b, 0 | 0xFF | b'\n'))
            .unwrap_or(buf.len());
        buf.truncate(end);
        match String::from_utf8(buf) {
            Ok(text) => Ok(text.trim_end_matches('\r').to_string()),
            Err(_) => self.fail(Error::format("bus reply is not valid UTF-8")),
        }
    }
}

#[cfg(target_os = "linux")]
mod linux {
    use std::collections::VecDeque;
    use std::fs::{File, OpenOptions};
    use std::io::{self, Read, Write};
    use std::os::unix::io::AsRawFd;
    use std::path::Path;

    use super::Bus;
    use crate::core::Result;

    /// `I2C_SLAVE` from linux/i2c-dev.h
    const I2C_TARGET: u16 = 0x0703;

    nix::ioctl_write_int_bad!(i2c_set_target, I2C_TARGET);

    /// Master side of a Linux i2c-dev adapter, e.g. `/dev/i2c-1`
    pub struct LinuxI2cBus {
        file: File,
        /// Target selected by the last ioctl
        selected: Option<u8>,
        target: u8,
        tx: Vec<u8>,
        rx: VecDeque<u8>,
    }

    impl LinuxI2cBus {
        /// Opens an i2c-dev character device
        pub fn open(path: impl AsRef<Path>) -> Result<Self> {
            let file = OpenOptions::new().read(true).write(true).open(path)?;
            Ok(LinuxI2cBus {
                file,
                selected: None,
                target: 0,
                tx: Vec::new(),
                rx: VecDeque::new(),
            })
        }

        fn select(&mut self, address: u8) -> io::Result<()> {
            if self.selected != Some(address) {
                // SAFETY: the descriptor is owned by `self.file` and the
                // request takes a plain integer argument.
                let selected =
                    unsafe { i2c_set_target(self.file.as_raw_fd(), libc::c_int::from(address)) };
                selected.map_err(io::Error::from)?;
                self.selected = Some(address);
            }
            Ok(())
        }
    }

    impl Bus for LinuxI2cBus {
        fn begin_transmission(&mut self, address: u8) {
            self.target = address;
            self.tx.clear();
        }

        fn write(&mut self, bytes: &[u8]) -> usize {
            self.tx.extend_from_slice(bytes);
            bytes.len()
        }

        fn end_transmission(&mut self) -> Result<()> {
            self.select(self.target)?;
            self.file.write_all(&self.tx)?;
            self.tx.clear();
            Ok(())
        }

        fn request_from(&mut self, address: u8, count: usize) -> Result<usize> {
            self.select(address)?;
            let mut buf = vec![0u8; count];
            let read = self.file.read(&mut buf)?;
            self.rx.clear();
            self.rx.extend(&buf[..read]);
            Ok(read)
        }

        fn available(&self) -> usize {
            self.rx.len()
        }

        fn read(&mut self, buf: &mut [u8]) -> usize {
            let n = buf.len().min(self.rx.len());
            for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
                *slot = byte;
            }
            n
        }
    }
}

#[cfg(target_os = "linux")]
pub use self::linux::LinuxI2cBus;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TelemetrySchema;
    use std::collections::VecDeque;

    /// In-memory bus: records transmissions and serves canned replies
    #[derive(Default)]
    struct MockBus {
        target: Option<u8>,
        pending: Vec<u8>,
        sent: Vec<(u8, Vec<u8>)>,
        /// Bytes the target will hand out on the next request
        reply: VecDeque<u8>,
        rx: VecDeque<u8>,
        /// Accept at most this many bytes per write
        write_limit: Option<usize>,
    }

    impl Bus for MockBus {
        fn begin_transmission(&mut self, address: u8) {
            self.target = Some(address);
            self.pending.clear();
        }

        fn write(&mut self, bytes: &[u8]) -> usize {
            let n = self.write_limit.map_or(bytes.len(), |l| l.min(bytes.len()));
            self.pending.extend_from_slice(&bytes[..n]);
            n
        }

        fn end_transmission(&mut self) -> Result<()> {
            let address = self.target.take().expect("transmission not started");
            self.sent.push((address, std::mem::take(&mut self.pending)));
            Ok(())
        }

        fn request_from(&mut self, _address: u8, count: usize) -> Result<usize> {
            let n = count.min(self.reply.len());
            self.rx.clear();
            self.rx.extend(self.reply.drain(..n));
            Ok(n)
        }

        fn available(&self) -> usize {
            self.rx.len()
        }

        fn read(&mut self, buf: &mut [u8]) -> usize {
            let n = buf.len().min(self.rx.len());
            for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
                *slot = byte;
            }
            n
        }
    }

    fn adapter() -> BusAdapter<MockBus> {
        BusAdapter::new(MockBus::default(), 8, AsciiCodec::new(TelemetrySchema::Minimal))
    }

    #[test]
    fn test_send_command_opcode_first() {
        let mut bus = adapter();
        bus.send_command(&CommandFrame::new(MotionCommand::Move, 300, 20)).unwrap();
        assert_eq!(bus.get_ref().sent, vec![(8, vec![0x01, 0x2C, 0x01, 0x14])]);
        assert_eq!(bus.stats().frames_sent, 1);
    }

    #[test]
    fn test_send_invalid_is_not_transmitted() {
        let mut bus = adapter();
        let err = bus.send_command(&CommandFrame::default()).unwrap_err();
        assert!(matches!(err, Error::Range(_)));
        assert!(bus.get_ref().sent.is_empty());
        assert_eq!(bus.stats().range_errors, 1);

        assert!(bus.send_command_ascii(&CommandFrame::default()).is_err());
        assert!(bus.get_ref().sent.is_empty());
    }

    #[test]
    fn test_send_command_ascii() {
        let mut bus = adapter();
        bus.send_command_ascii(&CommandFrame::new(MotionCommand::Rotate, -45, 10)).unwrap();
        assert_eq!(bus.get_ref().sent, vec![(8, b"2,-45,10".to_vec())]);
    }

    #[test]
    fn test_partial_write_is_transport_error() {
        let mut bus = adapter();
        bus.get_mut().write_limit = Some(2);
        let err = bus.send_command(&CommandFrame::stop()).unwrap_err();
        assert!(matches!(err, Error::Transport { expected: 4, available: 2 }));
        assert_eq!(bus.stats().transport_errors, 1);
    }

    #[test]
    fn test_read_telemetry() {
        let mut bus = adapter();
        bus.get_mut().reply.extend([0x5A, 0x00, 0x10, 0x27, 0x00, 0x00, 0x30]);
        let frame = bus.read_telemetry().unwrap();
        assert_eq!(frame, TelemetryFrame::minimal(90, 10_000, 48));
        assert_eq!(bus.stats().frames_received, 1);
    }

    #[test]
    fn test_short_read_keeps_previous_frame() {
        let mut bus = adapter();
        let previous = TelemetryFrame::minimal(12, 345, 6);
        let mut frame = previous;

        bus.get_mut().reply.extend([0x01, 0x02, 0x03]);
        match bus.read_telemetry() {
            Ok(fresh) => frame = fresh,
            Err(err) => assert!(matches!(err, Error::Transport { expected: 7, available: 3 })),
        }

        assert_eq!(frame, previous);
        assert_eq!(bus.get_ref().available(), 0);
        assert_eq!(bus.stats().transport_errors, 1);
        assert_eq!(bus.stats().frames_received, 0);
    }

    #[test]
    fn test_read_telemetry_ascii() {
        let mut bus = adapter();
        let mut reply = b"-15,250,33".to_vec();
        reply.resize(64, 0xFF);
        bus.get_mut().reply.extend(reply);
        let frame = bus.read_telemetry_ascii().unwrap();
        assert_eq!(frame, TelemetryFrame::minimal(-15, 250, 33));
    }

    #[test]
    fn test_read_telemetry_ascii_short_parse() {
        let mut bus = adapter();
        bus.get_mut().reply.extend(b"-15,oops".iter().copied());
        let err = bus.read_telemetry_ascii().unwrap_err();
        assert!(matches!(err, Error::Format(_)));
        assert_eq!(bus.stats().format_errors, 1);
    }

    #[test]
    fn test_target_replies() {
        let mut bus = adapter();
        bus.send_telemetry(&TelemetryFrame::minimal(1, 2, 3)).unwrap();
        assert_eq!(bus.get_ref().pending, vec![0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x03]);

        let mut bus = adapter();
        bus.send_telemetry_ascii(&TelemetryFrame::minimal(1, 2, 3)).unwrap();
        assert_eq!(bus.get_ref().pending, b"1,2,3".to_vec());
    }

    #[test]
    fn test_receive_command() {
        let mut bus = adapter();
        bus.get_mut().rx.extend([0x02, 0xA6, 0xFF, 0x32]);
        let frame = bus.receive_command(4).unwrap();
        assert_eq!(frame, CommandFrame::new(MotionCommand::Rotate, -90, 50));
    }

    #[test]
    fn test_receive_invalid_opcode_short_circuits() {
        let mut bus = adapter();
        bus.get_mut().rx.extend([0x09, 0x01, 0x02, 0x03]);
        let frame = bus.receive_command(4).unwrap();
        assert_eq!(frame.command, MotionCommand::Invalid);
        // Only the opcode was consumed.
        assert_eq!(bus.get_ref().available(), 3);
        assert_eq!(bus.stats().range_errors, 1);
    }

    #[test]
    fn test_receive_command_empty_and_short() {
        let mut bus = adapter();
        let err = bus.receive_command(0).unwrap_err();
        assert!(matches!(err, Error::Transport { available: 0, .. }));

        bus.get_mut().rx.extend([0x01, 0x05]);
        let err = bus.receive_command(2).unwrap_err();
        assert!(matches!(err, Error::Transport { expected: 4, available: 2 }));
        assert_eq!(bus.stats().transport_errors, 2);
    }

    #[test]
    fn test_receive_command_ascii() {
        let mut bus = adapter();
        bus.get_mut().rx.extend(b"1,120,60".iter().copied());
        let frame = bus.receive_command_ascii().unwrap();
        assert_eq!(frame, CommandFrame::new(MotionCommand::Move, 120, 60));

        bus.get_mut().rx.extend(b"5,1,1".iter().copied());
        let frame = bus.receive_command_ascii().unwrap();
        assert!(!frame.is_valid());
        assert_eq!(bus.stats().range_errors, 1);
    }
}
