use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use super::frame::{CommandFrame, MotionCommand, TelemetryFrame};
use crate::core::{Error, Result};

/// A frame with a fixed-width, little-endian binary layout.
///
/// Fields are concatenated in declaration order with no padding, length
/// prefix or checksum; the transport supplies exactly `WIRE_SIZE` bytes.
pub trait BinaryFrame: Sized {
    /// Number of bytes one frame occupies on the wire
    const WIRE_SIZE: usize;

    /// Appends the frame to `dst`
    fn encode(&self, dst: &mut BytesMut) -> Result<()>;

    /// Decodes one frame from the first `WIRE_SIZE` bytes of `src`
    fn decode(src: &[u8]) -> Result<Self>;
}

/// Checks `src` is long enough before any field is read
fn require(src: &[u8], expected: usize) -> Result<()> {
    if src.len() < expected {
        return Err(Error::transport(expected, src.len()));
    }
    Ok(())
}

/// `opcode (u8) · value (i16) · speed (u8)`
impl BinaryFrame for CommandFrame {
    const WIRE_SIZE: usize = 4;

    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        // Nothing is written for Invalid.
        let opcode = self.opcode()?;
        dst.reserve(Self::WIRE_SIZE);
        dst.put_u8(opcode);
        dst.put_i16_le(self.value);
        dst.put_u8(self.speed);
        Ok(())
    }

    fn decode(mut src: &[u8]) -> Result<Self> {
        require(src, Self::WIRE_SIZE)?;
        let opcode = src.get_u8();
        let (command, valid) = MotionCommand::from_opcode(opcode);
        if !valid {
            warn!(opcode, "binary command carries an opcode outside the command domain");
            return Ok(CommandFrame::new(MotionCommand::Invalid, 0, 0));
        }
        let value = src.get_i16_le();
        let speed = src.get_u8();
        Ok(CommandFrame::new(command, value, speed))
    }
}

/// `yaw (i16) · distance (i32) · ultrasonic (u8)`; the minimal schema only
impl BinaryFrame for TelemetryFrame {
    const WIRE_SIZE: usize = 7;

    fn encode(&self, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(Self::WIRE_SIZE);
        dst.put_i16_le(self.yaw_degrees);
        dst.put_i32_le(self.distance_cm);
        dst.put_u8(self.ultrasonic_distance_cm);
        Ok(())
    }

    fn decode(mut src: &[u8]) -> Result<Self> {
        require(src, Self::WIRE_SIZE)?;
        let yaw = src.get_i16_le();
        let distance = src.get_i32_le();
        let ultrasonic = src.get_u8();
        Ok(TelemetryFrame::minimal(yaw, distance, ultrasonic))
    }
}

/// Fixed-width codec for one frame type
#[derive(Debug)]
pub struct BinaryCodec<F> {
    _frame: PhantomData<fn() -> F>,
}

impl<F: BinaryFrame> BinaryCodec<F> {
    /// Creates a new binary codec
    pub fn new() -> Self {
        BinaryCodec {
            _frame: PhantomData,
        }
    }

    /// Bytes required before `decode` can yield a frame
    pub fn wire_size(&self) -> usize {
        F::WIRE_SIZE
    }
}

impl<F: BinaryFrame> Default for BinaryCodec<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F> Clone for BinaryCodec<F> {
    fn clone(&self) -> Self {
        BinaryCodec {
            _frame: PhantomData,
        }
    }
}

impl<F: BinaryFrame> Decoder for BinaryCodec<F> {
    type Item = F;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < F::WIRE_SIZE {
            // Need more data for a full frame
            return Ok(None);
        }

        let bytes = src.split_to(F::WIRE_SIZE);
        let frame = F::decode(&bytes)?;
        debug!(len = F::WIRE_SIZE, "decoded binary frame");
        Ok(Some(frame))
    }
}

impl<F: BinaryFrame> Encoder<F> for BinaryCodec<F> {
    type Error = Error;

    fn encode(&mut self, item: F, dst: &mut BytesMut) -> Result<()> {
        item.encode(dst)
    }
}

impl<'a, F: BinaryFrame> Encoder<&'a F> for BinaryCodec<F> {
    type Error = Error;

    fn encode(&mut self, item: &'a F, dst: &mut BytesMut) -> Result<()> {
        item.encode(dst)
    }
}
