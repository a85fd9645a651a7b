//! Newline-delimited codec for station telemetry
//!
//! Every reading travels as one line of comma-separated fields:
//! ```text
//! <station_id>,<unix_timestamp>,<temperature>,<humidity>[,<pressure>]\n
//! ```
//!
//! The timestamp is in seconds and may carry a fractional part; precision
//! beyond milliseconds is truncated. This layout is fixed for compatibility
//! with deployed stations.

use bytes::{Buf, Bytes, BytesMut};
use std::fmt::Write;
use thiserror::Error;

use crate::protocol::MAX_FRAME_LEN;
use crate::{Reading, ValidationError};

/// Frame delimiter
pub const DELIMITER: u8 = b'\n';

/// Protocol errors for a single frame
///
/// None of these are fatal to the stream: the offending frame has already
/// been consumed when one is reported.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Frame too long (max: {MAX_FRAME_LEN} bytes)")]
    FrameTooLong,

    #[error("Frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("Expected 4 or 5 fields, got {0}")]
    FieldCount(usize),

    #[error("Invalid {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Outcome of a single decode attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A complete, valid frame
    Reading(Reading),
    /// The buffer does not yet hold a complete frame
    NeedMoreData,
    /// A complete frame was present but rejected
    Malformed(CodecError),
}

/// Encode a reading into a newly allocated frame
pub fn encode(reading: &Reading) -> Bytes {
    let mut buf = BytesMut::with_capacity(64);
    encode_into(reading, &mut buf);
    buf.freeze()
}

/// Encode a reading directly into a provided buffer
pub fn encode_into(reading: &Reading, buf: &mut BytesMut) {
    let ms = reading.timestamp_ms();
    let (secs, frac) = (ms / 1000, ms % 1000);

    // Writing into a BytesMut cannot fail
    let _ = write!(buf, "{},{}", reading.station_id(), secs);
    if frac != 0 {
        let _ = write!(buf, ".{:03}", frac);
    }
    let _ = write!(buf, ",{},{}", reading.temperature(), reading.humidity());
    if let Some(pressure) = reading.pressure() {
        let _ = write!(buf, ",{}", pressure);
    }
    buf.extend_from_slice(&[DELIMITER]);
}

/// Try to decode one frame from the front of `buf`
///
/// Returns the outcome together with the exact number of bytes it consumed.
/// `NeedMoreData` never consumes. When more than [`MAX_FRAME_LEN`] bytes are
/// buffered without a delimiter, the whole buffer is reported as one
/// `FrameTooLong` frame; the caller should keep discarding up to the next
/// delimiter (see [`FrameDecoder`]).
pub fn decode(buf: &[u8]) -> (Decoded, usize) {
    match buf.iter().position(|&b| b == DELIMITER) {
        Some(pos) if pos > MAX_FRAME_LEN => {
            (Decoded::Malformed(CodecError::FrameTooLong), pos + 1)
        }
        Some(pos) => {
            let decoded = match parse_frame(&buf[..pos]) {
                Ok(reading) => Decoded::Reading(reading),
                Err(e) => Decoded::Malformed(e),
            };
            (decoded, pos + 1)
        }
        None if buf.len() > MAX_FRAME_LEN => {
            (Decoded::Malformed(CodecError::FrameTooLong), buf.len())
        }
        None => (Decoded::NeedMoreData, 0),
    }
}

fn parse_frame(line: &[u8]) -> Result<Reading, CodecError> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let text = std::str::from_utf8(line).map_err(|_| CodecError::InvalidUtf8)?;

    let fields: Vec<&str> = text.split(',').map(str::trim).collect();
    if !(4..=5).contains(&fields.len()) {
        return Err(CodecError::FieldCount(fields.len()));
    }

    let timestamp_ms = parse_timestamp(fields[1])?;
    let temperature = parse_number("temperature", fields[2])?;
    let humidity = parse_number("humidity", fields[3])?;
    let pressure = fields
        .get(4)
        .map(|value| parse_number("pressure", value))
        .transpose()?;

    Ok(Reading::new(
        fields[0],
        timestamp_ms,
        temperature,
        humidity,
        pressure,
    )?)
}

fn parse_number(field: &'static str, value: &str) -> Result<f64, CodecError> {
    value.parse::<f64>().map_err(|_| CodecError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

/// Parse `secs` or `secs.fraction` into epoch milliseconds
fn parse_timestamp(value: &str) -> Result<u64, CodecError> {
    let invalid = || CodecError::InvalidNumber {
        field: "timestamp",
        value: value.to_string(),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    let (secs, frac) = match value.split_once('.') {
        Some((secs, frac)) => (secs, Some(frac)),
        None => (value, None),
    };
    if !all_digits(secs) {
        return Err(invalid());
    }
    let secs: u64 = secs.parse().map_err(|_| invalid())?;

    let millis = match frac {
        None => 0,
        Some(frac) if all_digits(frac) => frac
            .bytes()
            .chain(std::iter::repeat(b'0'))
            .take(3)
            .fold(0u64, |acc, b| acc * 10 + u64::from(b - b'0')),
        Some(_) => return Err(invalid()),
    };

    secs.checked_mul(1000)
        .and_then(|ms| ms.checked_add(millis))
        .ok_or_else(invalid)
}

/// Decoder state machine for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Partial frame data being accumulated
    buffer: BytesMut,
    /// Dropping the tail of an oversized frame until the next delimiter
    discarding: bool,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
            discarding: false,
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next frame from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete
    /// frames. An `Err` means one malformed frame was consumed; decoding can
    /// continue with the next call.
    pub fn decode_next(&mut self) -> Result<Option<Reading>, CodecError> {
        if self.discarding {
            match self.buffer.iter().position(|&b| b == DELIMITER) {
                Some(pos) => {
                    self.buffer.advance(pos + 1);
                    self.discarding = false;
                }
                None => {
                    self.buffer.clear();
                    return Ok(None);
                }
            }
        }

        let (decoded, consumed) = decode(&self.buffer);
        let reached_delimiter = consumed > 0 && self.buffer[consumed - 1] == DELIMITER;
        self.buffer.advance(consumed);

        match decoded {
            Decoded::Reading(reading) => Ok(Some(reading)),
            Decoded::NeedMoreData => Ok(None),
            Decoded::Malformed(e) => {
                if !reached_delimiter {
                    self.discarding = true;
                }
                Err(e)
            }
        }
    }

    /// Bytes buffered but not yet consumed as a frame
    ///
    /// Zero after `decode_next` has drained everything up to the last
    /// delimiter; otherwise the length of the pending partial frame.
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }
}
