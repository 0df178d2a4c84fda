//! Binary frame codec for the NVR push channel.
//!
//! Each frame on the wire is an 8-byte header followed by the payload:
//!
//! ```text
//! [packetType:u8][payloadFormat:u8][deflated:u8][reserved:u8][payloadLength:i32 BE][payload]
//! ```
//!
//! `payloadFormat` selects how the payload bytes are interpreted: `1` is a
//! UTF-8 JSON document, `2` is a UTF-8 string, `3` is raw bytes. When the
//! `deflated` flag is set the payload is raw-deflate compressed on the wire
//! and inflated before interpretation; `payloadLength` is always the
//! transmitted (possibly compressed) size.
//!
//! Decoding distinguishes two failure scopes: a header that cannot be read
//! means the whole byte stream is unsynchronized (the connection must be
//! reset), while payload-scoped corruption (bad deflate, bad JSON) only
//! condemns the single packet it arrived in.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use serde_json::Value;
use tracing::trace;

use crate::{NvrError, Result};

/// Size of the fixed frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Payload interpretation selector carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadFormat {
    Json = 1,
    Utf8String = 2,
    RawBytes = 3,
}

impl PayloadFormat {
    fn from_wire(byte: u8) -> Result<Self> {
        match byte {
            1 => Ok(PayloadFormat::Json),
            2 => Ok(PayloadFormat::Utf8String),
            3 => Ok(PayloadFormat::RawBytes),
            other => Err(NvrError::frame_corrupt(
                "frame header",
                format!("unknown payload format {other}"),
            )),
        }
    }
}

/// Decoded payload of a single frame.
///
/// JSON payloads are parsed into a structured value at decode time; string
/// and raw payloads are carried opaquely.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    Json(Value),
    Utf8String(Vec<u8>),
    RawBytes(Vec<u8>),
}

impl FramePayload {
    /// Payload format byte for this payload variant.
    pub fn format(&self) -> PayloadFormat {
        match self {
            FramePayload::Json(_) => PayloadFormat::Json,
            FramePayload::Utf8String(_) => PayloadFormat::Utf8String,
            FramePayload::RawBytes(_) => PayloadFormat::RawBytes,
        }
    }

    /// Structured JSON value, when this is a JSON payload.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            FramePayload::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// One decoded unit of the binary push protocol.
///
/// Immutable once decoded; re-encoding produces a fresh byte buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Packet type discriminator from the header (opaque to the codec).
    pub packet_type: u8,
    /// Whether the payload travels deflate-compressed on the wire.
    pub deflated: bool,
    /// Reserved header byte, preserved for round-tripping.
    pub reserved: u8,
    /// Decoded payload.
    pub payload: FramePayload,
}

impl Frame {
    /// Convenience constructor for an uncompressed JSON frame.
    pub fn json(packet_type: u8, value: Value) -> Self {
        Frame { packet_type, deflated: false, reserved: 0, payload: FramePayload::Json(value) }
    }

    /// Decode one frame starting at `offset`.
    ///
    /// Returns the frame and the offset of the first byte after it
    /// (`offset + 8 + payloadLength`, the transmitted size).
    ///
    /// # Errors
    ///
    /// [`NvrError::FrameDecode`]. Header-level failures (truncated header,
    /// negative length, payload running past the buffer, unknown format
    /// byte) are marked stream-corrupt; payload-level failures (bad
    /// deflate, bad JSON) are scoped to this packet.
    pub fn decode(buf: &[u8], offset: usize) -> Result<(Self, usize)> {
        let header = buf.get(offset..offset + FRAME_HEADER_SIZE).ok_or_else(|| {
            NvrError::frame_corrupt(
                "frame header",
                format!("need {FRAME_HEADER_SIZE} bytes at offset {offset}, have {}", buf.len()),
            )
        })?;

        let packet_type = header[0];
        let format = PayloadFormat::from_wire(header[1])?;
        let deflated = match header[2] {
            0 => false,
            1 => true,
            other => {
                return Err(NvrError::frame_corrupt(
                    "frame header",
                    format!("compression flag must be 0 or 1, got {other}"),
                ));
            }
        };
        let reserved = header[3];

        let payload_length = i32::from_be_bytes([header[4], header[5], header[6], header[7]]);
        let payload_length = usize::try_from(payload_length).map_err(|_| {
            NvrError::frame_corrupt(
                "frame header",
                format!("negative payload length {payload_length}"),
            )
        })?;

        let payload_start = offset + FRAME_HEADER_SIZE;
        let raw = buf.get(payload_start..payload_start + payload_length).ok_or_else(|| {
            NvrError::frame_corrupt(
                "frame payload",
                format!(
                    "payload of {payload_length} bytes at offset {payload_start} runs past \
                     buffer of {} bytes",
                    buf.len()
                ),
            )
        })?;

        let bytes = if deflated { inflate(raw)? } else { raw.to_vec() };

        let payload = match format {
            PayloadFormat::Json => {
                let value = serde_json::from_slice(&bytes).map_err(|e| {
                    NvrError::frame_decode("frame payload", format!("invalid JSON: {e}"))
                })?;
                FramePayload::Json(value)
            }
            PayloadFormat::Utf8String => FramePayload::Utf8String(bytes),
            PayloadFormat::RawBytes => FramePayload::RawBytes(bytes),
        };

        trace!(packet_type, ?format, deflated, payload_length, "decoded frame");

        let frame = Frame { packet_type, deflated, reserved, payload };
        Ok((frame, payload_start + payload_length))
    }

    /// Encode this frame into a fresh byte buffer, compressing the payload
    /// when the frame is flagged deflated.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let bytes = match &self.payload {
            FramePayload::Json(value) => serde_json::to_vec(value).map_err(|e| {
                NvrError::frame_decode("frame encode", format!("JSON serialization: {e}"))
            })?,
            FramePayload::Utf8String(bytes) | FramePayload::RawBytes(bytes) => bytes.clone(),
        };

        let wire_bytes = if self.deflated { deflate(&bytes)? } else { bytes };

        let payload_length = i32::try_from(wire_bytes.len()).map_err(|_| {
            NvrError::frame_decode(
                "frame encode",
                format!("payload of {} bytes exceeds i32 length field", wire_bytes.len()),
            )
        })?;

        let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + wire_bytes.len());
        out.push(self.packet_type);
        out.push(self.payload.format() as u8);
        out.push(u8::from(self.deflated));
        out.push(self.reserved);
        out.extend_from_slice(&payload_length.to_be_bytes());
        out.extend_from_slice(&wire_bytes);
        Ok(out)
    }
}

fn inflate(raw: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    DeflateDecoder::new(raw)
        .read_to_end(&mut out)
        .map_err(|e| NvrError::frame_decode("frame payload", format!("inflate failed: {e}")))?;
    Ok(out)
}

fn deflate(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(bytes)
        .and_then(|_| encoder.finish())
        .map_err(|e| NvrError::frame_decode("frame encode", format!("deflate failed: {e}")))
}
