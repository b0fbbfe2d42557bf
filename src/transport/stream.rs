use std::io::{self, ErrorKind, Read, Write};

use bytes::BytesMut;
use serialport::SerialPort;
use tokio_util::codec::Decoder;
use tracing::{debug, info};

use super::LinkStats;
use crate::core::{Error, Result, SerialConfig};
use crate::protocol::{
    AsciiCodec, BinaryCodec, BinaryFrame, CommandFrame, TelemetryFrame, TelemetrySchema,
};

/// Size of a single read from the underlying device
const READ_CHUNK: usize = 64;

/// Frame-level operations over an ordered, lossless byte stream.
///
/// Two framing disciplines share the stream: fixed-width binary frames and
/// newline-terminated ASCII lines. Reads are bounded by the device's own
/// timeout; a timeout yields `Ok(None)` and keeps any partial frame buffered.
/// There is no resynchronization: a dropped byte shifts every later binary
/// frame until the stream is reset.
pub struct StreamAdapter<T> {
    io: T,
    /// Bytes received but not yet framed
    read_buf: BytesMut,
    ascii: AsciiCodec,
    stats: LinkStats,
}

/// Reads once from `io` into `buf`.
///
/// Returns `Ok(false)` when the read timed out without data.
fn fill<T: Read>(io: &mut T, buf: &mut BytesMut) -> Result<bool> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        return match io.read(&mut chunk) {
            Ok(0) => Err(Error::disconnected("stream reached end of file")),
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if is_timeout(&e) => Ok(false),
            Err(e) => Err(e.into()),
        };
    }
}

/// Runs `decoder` over the buffer, pulling more bytes until it yields a frame
/// or the device has nothing more to give within its timeout
fn poll_frame<T, D>(io: &mut T, buf: &mut BytesMut, decoder: &mut D) -> Result<Option<D::Item>>
where
    T: Read,
    D: Decoder<Error = Error>,
{
    loop {
        if let Some(item) = decoder.decode(buf)? {
            return Ok(Some(item));
        }
        if !fill(io, buf)? {
            return Ok(None);
        }
    }
}

impl<T: Read + Write> StreamAdapter<T> {
    pub fn new(io: T, ascii: AsciiCodec) -> Self {
        StreamAdapter {
            io,
            read_buf: BytesMut::with_capacity(4 * READ_CHUNK),
            ascii,
            stats: LinkStats::default(),
        }
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn ascii(&self) -> &AsciiCodec {
        &self.ascii
    }

    pub fn get_ref(&self) -> &T {
        &self.io
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.io
    }

    /// Bytes received but not yet consumed by a frame
    pub fn buffered(&self) -> usize {
        self.read_buf.len()
    }

    fn counted<V>(&mut self, result: Result<Option<V>>) -> Result<Option<V>> {
        match result {
            Ok(Some(value)) => {
                self.stats.frames_received += 1;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                self.stats.record(&err);
                Err(err)
            }
        }
    }

    fn read_binary<F: BinaryFrame>(&mut self) -> Result<Option<F>> {
        let mut codec = BinaryCodec::<F>::new();
        let result = poll_frame(&mut self.io, &mut self.read_buf, &mut codec);
        self.counted(result)
    }

    /// Blocks (up to the device timeout) for exactly 4 command bytes
    pub fn read_command(&mut self) -> Result<Option<CommandFrame>> {
        let frame = self.read_binary::<CommandFrame>()?;
        if let Some(frame) = &frame {
            if !frame.is_valid() {
                self.stats.range_errors += 1;
            }
            debug!(%frame, "recv stream command");
        }
        Ok(frame)
    }

    /// Blocks (up to the device timeout) for exactly 7 telemetry bytes
    pub fn read_telemetry(&mut self) -> Result<Option<TelemetryFrame>> {
        let frame = self.read_binary::<TelemetryFrame>()?;
        if let Some(frame) = &frame {
            debug!(?frame, "recv stream telemetry");
        }
        Ok(frame)
    }

    /// Next complete line, without its terminator
    pub fn read_line(&mut self) -> Result<Option<String>> {
        let result = poll_frame(&mut self.io, &mut self.read_buf, &mut self.ascii);
        if let Err(err) = &result {
            self.stats.record(err);
        }
        result
    }

    /// Next line parsed as `opcode,value,speed`; a short parse is an error
    pub fn read_command_line(&mut self) -> Result<Option<CommandFrame>> {
        let result = match self.read_line()? {
            Some(line) => self.ascii.decode_command(&line).into_result().map(Some),
            None => Ok(None),
        };
        let frame = self.counted(result)?;
        if let Some(frame) = &frame {
            if !frame.is_valid() {
                self.stats.range_errors += 1;
            }
        }
        Ok(frame)
    }

    /// Next line parsed as telemetry in whichever schema it carries
    pub fn read_telemetry_line(&mut self) -> Result<Option<(TelemetryFrame, TelemetrySchema)>> {
        let result = match self.read_line()? {
            Some(line) => {
                debug!(line = %line, "recv stream telemetry line");
                self.ascii.decode_telemetry_any(&line).map(Some)
            }
            None => Ok(None),
        };
        self.counted(result)
    }

    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.io.write_all(bytes)?;
        self.io.flush()?;
        self.stats.frames_sent += 1;
        Ok(())
    }

    fn send_binary<F: BinaryFrame>(&mut self, frame: &F) -> Result<()> {
        let mut buf = BytesMut::with_capacity(F::WIRE_SIZE);
        if let Err(err) = frame.encode(&mut buf) {
            self.stats.record(&err);
            return Err(err);
        }
        self.send(&buf)
    }

    /// Writes all 4 command bytes
    pub fn write_command(&mut self, frame: &CommandFrame) -> Result<()> {
        self.send_binary(frame)?;
        debug!(%frame, "sent stream command");
        Ok(())
    }

    /// Writes the 7-byte minimal telemetry layout
    pub fn write_telemetry(&mut self, frame: &TelemetryFrame) -> Result<()> {
        self.send_binary(frame)?;
        debug!(?frame, "sent stream telemetry");
        Ok(())
    }

    pub fn write_command_line(&mut self, frame: &CommandFrame) -> Result<()> {
        let line = match self.ascii.encode_command_line(frame) {
            Ok(line) => line,
            Err(err) => {
                self.stats.record(&err);
                return Err(err);
            }
        };
        self.send(line.as_bytes())?;
        debug!(line = line.trim_end(), "sent stream command line");
        Ok(())
    }

    /// Writes telemetry in the codec's configured schema
    pub fn write_telemetry_line(&mut self, frame: &TelemetryFrame) -> Result<()> {
        let line = self.ascii.encode_telemetry_line(frame);
        self.send(line.as_bytes())?;
        debug!(line = line.trim_end(), "sent stream telemetry line");
        Ok(())
    }
}

/// Opens a serial device as a stream adapter
pub fn open_serial(
    config: &SerialConfig,
    max_line_length: usize,
) -> Result<StreamAdapter<Box<dyn SerialPort>>> {
    let port = serialport::new(config.device.as_str(), config.baud_rate)
        .timeout(config.timeout)
        .open()
        .map_err(|e| Error::serial(format!("Failed to open {}: {}", config.device, e)))?;

    info!(device = %config.device, baud = config.baud_rate, "opened serial stream");
    let ascii = AsciiCodec::with_max_line_length(config.telemetry_schema, max_line_length);
    Ok(StreamAdapter::new(port, ascii))
}

/// Whether an I/O error only means no data was ready yet
pub(crate) fn is_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
}
