use std::fmt::Write as _;
use std::str::FromStr;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use super::frame::{CommandFrame, MotionCommand, TelemetryFrame, TelemetrySchema};
use super::{FIELD_DELIMITER, LINE_TERMINATOR, MAX_LINE_LENGTH};
use crate::core::{Error, Result};

/// Result of parsing one delimited text frame.
///
/// Parsing stops at the first field that is missing or malformed; the fields
/// after it keep their `Default` values. Only a complete parse may be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded<T> {
    pub frame: T,
    /// Leading fields that parsed
    pub fields_parsed: usize,
    /// Fields the frame layout requires
    pub fields_expected: usize,
    /// Fields the text actually contained
    pub fields_present: usize,
}

impl<T> Decoded<T> {
    pub fn is_complete(&self) -> bool {
        self.fields_parsed == self.fields_expected && self.fields_present == self.fields_expected
    }

    /// The frame if every field parsed, a format error otherwise
    pub fn into_result(self) -> Result<T> {
        if self.is_complete() {
            Ok(self.frame)
        } else {
            Err(Error::format(format!(
                "parsed {} of {} fields ({} present)",
                self.fields_parsed, self.fields_expected, self.fields_present
            )))
        }
    }
}

/// Sequential field reader that counts how far it got
struct Fields<'a> {
    iter: std::str::Split<'a, char>,
    parsed: usize,
    failed: bool,
}

impl<'a> Fields<'a> {
    fn new(text: &'a str) -> Self {
        Fields {
            iter: text.split(FIELD_DELIMITER),
            parsed: 0,
            failed: false,
        }
    }

    fn next<N: FromStr>(&mut self) -> Option<N> {
        if self.failed {
            return None;
        }
        let value = self.iter.next().and_then(|field| field.trim().parse().ok());
        match value {
            Some(_) => self.parsed += 1,
            None => self.failed = true,
        }
        value
    }

    fn next_flag(&mut self) -> Option<bool> {
        match self.next::<u8>()? {
            0 => Some(false),
            1 => Some(true),
            _ => {
                self.parsed -= 1;
                self.failed = true;
                None
            }
        }
    }
}

fn count_fields(text: &str) -> usize {
    if text.trim().is_empty() {
        0
    } else {
        text.split(FIELD_DELIMITER).count()
    }
}

/// Comma-separated decimal codec with newline line framing
#[derive(Debug, Clone)]
pub struct AsciiCodec {
    /// Layout used when encoding telemetry
    schema: TelemetrySchema,
    max_line_length: usize,
    /// Dropping the tail of an over-long line
    discarding: bool,
}

impl AsciiCodec {
    /// Creates a new ASCII codec
    pub fn new(schema: TelemetrySchema) -> Self {
        Self::with_max_line_length(schema, MAX_LINE_LENGTH)
    }

    pub fn with_max_line_length(schema: TelemetrySchema, max_line_length: usize) -> Self {
        AsciiCodec {
            schema,
            max_line_length,
            discarding: false,
        }
    }

    pub fn schema(&self) -> TelemetrySchema {
        self.schema
    }

    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    /// `opcode,value,speed`; `Invalid` is never rendered
    pub fn encode_command(&self, frame: &CommandFrame) -> Result<String> {
        let opcode = frame.opcode()?;
        Ok(format!("{},{},{}", opcode, frame.value, frame.speed))
    }

    pub fn encode_command_line(&self, frame: &CommandFrame) -> Result<String> {
        let mut line = self.encode_command(frame)?;
        line.push(LINE_TERMINATOR);
        Ok(line)
    }

    /// Renders telemetry in this codec's schema
    pub fn encode_telemetry(&self, frame: &TelemetryFrame) -> String {
        encode_telemetry_as(frame, self.schema)
    }

    pub fn encode_telemetry_line(&self, frame: &TelemetryFrame) -> String {
        let mut line = self.encode_telemetry(frame);
        line.push(LINE_TERMINATOR);
        line
    }

    /// Parses `opcode,value,speed`.
    ///
    /// An opcode outside the command domain still counts as parsed but yields
    /// `MotionCommand::Invalid`.
    pub fn decode_command(&self, text: &str) -> Decoded<CommandFrame> {
        let text = text.trim_end_matches(['\r', '\n']);
        let mut fields = Fields::new(text);
        let mut frame = CommandFrame::default();

        if let Some(opcode) = fields.next::<u8>() {
            let (command, valid) = MotionCommand::from_opcode(opcode);
            if !valid {
                warn!(opcode, "ascii command carries an opcode outside the command domain");
            }
            frame.command = command;
            if let Some(value) = fields.next() {
                frame.value = value;
                if let Some(speed) = fields.next() {
                    frame.speed = speed;
                }
            }
        }

        let decoded = Decoded {
            frame,
            fields_parsed: fields.parsed,
            fields_expected: 3,
            fields_present: count_fields(text),
        };
        debug!(text, parsed = decoded.fields_parsed, "decoded ascii command");
        decoded
    }

    /// Parses telemetry laid out in this codec's schema
    pub fn decode_telemetry(&self, text: &str) -> Decoded<TelemetryFrame> {
        decode_telemetry_as(text, self.schema)
    }

    /// Parses telemetry in whichever schema its field count names
    pub fn decode_telemetry_any(&self, text: &str) -> Result<(TelemetryFrame, TelemetrySchema)> {
        let text = text.trim_end_matches(['\r', '\n']);
        let present = count_fields(text);
        let schema = TelemetrySchema::from_field_count(present).ok_or_else(|| {
            Error::format(format!("{} telemetry fields match no schema", present))
        })?;
        let frame = decode_telemetry_as(text, schema).into_result()?;
        Ok((frame, schema))
    }
}

impl Default for AsciiCodec {
    fn default() -> Self {
        AsciiCodec::new(TelemetrySchema::Minimal)
    }
}

/// Renders telemetry in an explicit schema
pub fn encode_telemetry_as(frame: &TelemetryFrame, schema: TelemetrySchema) -> String {
    let mut out = String::with_capacity(48);
    // Writing into a String cannot fail.
    let _ = write!(
        out,
        "{},{},{}",
        frame.yaw_degrees, frame.distance_cm, frame.ultrasonic_distance_cm
    );
    if schema == TelemetrySchema::Extended {
        let _ = write!(
            out,
            ",{},{},{},{}",
            u8::from(frame.left_ir_detected),
            u8::from(frame.right_ir_detected),
            frame.left_encoder,
            frame.right_encoder
        );
    }
    out
}

/// Parses telemetry laid out in an explicit schema
pub fn decode_telemetry_as(text: &str, schema: TelemetrySchema) -> Decoded<TelemetryFrame> {
    let text = text.trim_end_matches(['\r', '\n']);
    let mut fields = Fields::new(text);
    let mut frame = TelemetryFrame::default();

    let minimal = (|| -> Option<()> {
        frame.yaw_degrees = fields.next()?;
        frame.distance_cm = fields.next()?;
        frame.ultrasonic_distance_cm = fields.next()?;
        Some(())
    })();

    if minimal.is_some() && schema == TelemetrySchema::Extended {
        let _ = (|| -> Option<()> {
            frame.left_ir_detected = fields.next_flag()?;
            frame.right_ir_detected = fields.next_flag()?;
            frame.left_encoder = fields.next()?;
            frame.right_encoder = fields.next()?;
            Some(())
        })();
    }

    let decoded = Decoded {
        frame,
        fields_parsed: fields.parsed,
        fields_expected: schema.field_count(),
        fields_present: count_fields(text),
    };
    if !decoded.is_complete() {
        warn!(
            text,
            parsed = decoded.fields_parsed,
            expected = decoded.fields_expected,
            "short ascii telemetry parse"
        );
    }
    decoded
}

impl Decoder for AsciiCodec {
    type Item = String;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>> {
        loop {
            let newline = src.iter().position(|b| *b == b'\n');

            if self.discarding {
                match newline {
                    Some(offset) => {
                        src.advance(offset + 1);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        src.clear();
                        return Ok(None);
                    }
                }
            }

            return match newline {
                Some(offset) if offset <= self.max_line_length => {
                    let line = src.split_to(offset + 1);
                    let line = &line[..offset];
                    let line = line.strip_suffix(b"\r").unwrap_or(line);
                    // The robot pads short bus replies with NULs.
                    let line: Vec<u8> = line.iter().copied().filter(|b| *b != 0).collect();
                    String::from_utf8(line)
                        .map(Some)
                        .map_err(|_| Error::format("line is not valid UTF-8"))
                }
                Some(offset) => {
                    src.advance(offset + 1);
                    Err(Error::format(format!(
                        "line of {} bytes exceeds the {} byte limit",
                        offset, self.max_line_length
                    )))
                }
                None if src.len() > self.max_line_length => {
                    src.clear();
                    self.discarding = true;
                    Err(Error::format(format!(
                        "no line terminator within {} bytes",
                        self.max_line_length
                    )))
                }
                None => Ok(None),
            };
        }
    }
}

impl<'a> Encoder<&'a str> for AsciiCodec {
    type Error = Error;

    fn encode(&mut self, line: &'a str, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        if !line.ends_with(LINE_TERMINATOR) {
            dst.put_u8(b'\n');
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extended(yaw: i16, distance: i32, left: i32, right: i32) -> TelemetryFrame {
        TelemetryFrame {
            yaw_degrees: yaw,
            distance_cm: distance,
            ultrasonic_distance_cm: 42,
            left_ir_detected: true,
            right_ir_detected: false,
            left_encoder: left,
            right_encoder: right,
        }
    }

    #[test]
    fn test_command_text() {
        let codec = AsciiCodec::default();
        let frame = CommandFrame::new(MotionCommand::Move, 15, 0);
        assert_eq!(codec.encode_command(&frame).unwrap(), "1,15,0");
        assert_eq!(codec.encode_command_line(&frame).unwrap(), "1,15,0\n");

        let decoded = codec.decode_command("2,-30,0\n");
        assert!(decoded.is_complete());
        assert_eq!(decoded.frame, CommandFrame::new(MotionCommand::Rotate, -30, 0));
    }

    #[test]
    fn test_command_extremes_roundtrip() {
        let codec = AsciiCodec::default();
        for (value, speed) in [(0, 0), (i16::MIN, u8::MAX), (i16::MAX, 1), (-1, 0)] {
            let frame = CommandFrame::new(MotionCommand::Stop, value, speed);
            let decoded = codec.decode_command(&codec.encode_command(&frame).unwrap());
            assert_eq!(decoded.fields_parsed, 3);
            assert_eq!(decoded.into_result().unwrap(), frame);
        }
    }

    #[test]
    fn test_command_invalid_opcode() {
        let codec = AsciiCodec::default();
        let decoded = codec.decode_command("7,10,10");
        assert!(decoded.is_complete());
        assert_eq!(decoded.frame.command, MotionCommand::Invalid);
        assert!(codec.encode_command(&decoded.frame).is_err());
    }

    #[test]
    fn test_command_short_parse() {
        let codec = AsciiCodec::default();
        let decoded = codec.decode_command("1,abc,5");
        assert_eq!(decoded.fields_parsed, 1);
        assert_eq!(decoded.frame.command, MotionCommand::Move);
        assert_eq!(decoded.frame.value, 0);
        assert_eq!(decoded.frame.speed, 0);
        assert!(matches!(decoded.into_result(), Err(Error::Format(_))));

        let decoded = codec.decode_command("1,20");
        assert_eq!(decoded.fields_parsed, 2);
        assert!(!decoded.is_complete());

        let decoded = codec.decode_command("");
        assert_eq!(decoded.fields_parsed, 0);
        assert_eq!(decoded.fields_present, 0);
    }

    #[test]
    fn test_out_of_width_numeral_rejected() {
        let codec = AsciiCodec::default();
        let decoded = codec.decode_command("1,40000,0");
        assert_eq!(decoded.fields_parsed, 1);
        let decoded = codec.decode_command("256,1,0");
        assert_eq!(decoded.fields_parsed, 0);
    }

    #[test]
    fn test_trailing_fields_are_not_complete() {
        let codec = AsciiCodec::default();
        let decoded = codec.decode_command("1,2,3,4");
        assert_eq!(decoded.fields_parsed, 3);
        assert_eq!(decoded.fields_present, 4);
        assert!(!decoded.is_complete());
    }

    #[test]
    fn test_telemetry_schemas() {
        let frame = extended(-45, 1234, 100, -100);

        let minimal = AsciiCodec::new(TelemetrySchema::Minimal);
        assert_eq!(minimal.encode_telemetry(&frame), "-45,1234,42");
        assert_eq!(minimal.encode_telemetry_line(&frame), "-45,1234,42\n");

        let full = AsciiCodec::new(TelemetrySchema::Extended);
        assert_eq!(full.encode_telemetry(&frame), "-45,1234,42,1,0,100,-100");

        let decoded = full.decode_telemetry("-45,1234,42,1,0,100,-100");
        assert_eq!(decoded.fields_parsed, 7);
        assert_eq!(decoded.into_result().unwrap(), frame);

        let decoded = minimal.decode_telemetry("-45,1234,42");
        assert_eq!(decoded.into_result().unwrap(), frame.project(TelemetrySchema::Minimal));
    }

    #[test]
    fn test_telemetry_extremes_roundtrip() {
        let codec = AsciiCodec::new(TelemetrySchema::Extended);
        for frame in [
            TelemetryFrame::default(),
            extended(i16::MIN, i32::MIN, i32::MIN, i32::MAX),
            extended(i16::MAX, i32::MAX, -1, 0),
        ] {
            let decoded = codec.decode_telemetry(&codec.encode_telemetry_line(&frame));
            assert_eq!(decoded.fields_parsed, decoded.fields_expected);
            assert_eq!(decoded.into_result().unwrap(), frame);
        }
    }

    #[test]
    fn test_telemetry_bad_flag() {
        let codec = AsciiCodec::new(TelemetrySchema::Extended);
        let decoded = codec.decode_telemetry("1,2,3,2,0,5,6");
        assert_eq!(decoded.fields_parsed, 3);
        assert!(!decoded.frame.left_ir_detected);
        assert_eq!(decoded.frame.left_encoder, 0);
        assert!(decoded.into_result().is_err());
    }

    #[test]
    fn test_telemetry_any() {
        let codec = AsciiCodec::default();
        let (frame, schema) = codec.decode_telemetry_any("10,20,30\r\n").unwrap();
        assert_eq!(schema, TelemetrySchema::Minimal);
        assert_eq!(frame, TelemetryFrame::minimal(10, 20, 30));

        let (frame, schema) = codec.decode_telemetry_any("10,20,30,0,1,7,8").unwrap();
        assert_eq!(schema, TelemetrySchema::Extended);
        assert!(frame.right_ir_detected);
        assert_eq!(frame.right_encoder, 8);

        assert!(matches!(codec.decode_telemetry_any("10,20"), Err(Error::Format(_))));
        assert!(matches!(codec.decode_telemetry_any("x,20,30"), Err(Error::Format(_))));
    }

    #[test]
    fn test_line_framing() {
        let mut codec = AsciiCodec::default();
        let mut buf = BytesMut::from(&b"1,2,3\r\n4,5"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("1,2,3".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b",6\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("4,5,6".to_string()));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_line_too_long_is_discarded() {
        let mut codec = AsciiCodec::with_max_line_length(TelemetrySchema::Minimal, 8);
        let mut buf = BytesMut::from(&b"0123456789ABCDEF"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(Error::Format(_))));
        assert!(buf.is_empty());

        buf.extend_from_slice(b"GHIJ\n7,8,9\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("7,8,9".to_string()));
    }

    #[test]
    fn test_line_encoder() {
        let mut codec = AsciiCodec::default();
        let mut buf = BytesMut::new();
        codec.encode("GET_DATA", &mut buf).unwrap();
        codec.encode("1,2,3\n", &mut buf).unwrap();
        assert_eq!(&buf[..], b"GET_DATA\n1,2,3\n");
    }
}
