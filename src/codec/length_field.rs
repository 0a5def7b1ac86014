//! Length-field framing.
//!
//! Each frame carries a length field of 1, 2, 3, 4 or 8 bytes, written
//! either as a binary integer or as zero-padded decimal digits. Encoder and
//! decoder are configured separately:
//!
//! - the encoder writes `payload.len() + adjustment` (plus the field width
//!   when the length counts the field itself) followed by the payload;
//! - the decoder skips `length_field_offset` bytes, reads the field, adds
//!   its own adjustment to get the number of bytes following the field,
//!   and strips `initial_bytes_to_strip` bytes from the front of the frame.
//!
//! ```text
//! ┌──────────────┬──────────────┬─────────────────────────────┐
//! │ offset bytes │ length field │ length + adjustment bytes   │
//! └──────────────┴──────────────┴─────────────────────────────┘
//!  <── initial_bytes_to_strip ──> (default: offset + field)
//! ```

use super::{Decoded, MAX_FRAME_SIZE};
use crate::error::FrameError;
use bytes::{BufMut, Bytes, BytesMut};
use serde::Deserialize;

/// Byte order of a binary length field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

/// Representation of the length field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LengthFormat {
    #[default]
    Binary,
    /// Decimal digits, zero-padded to the field width.
    Ascii,
}

/// Length-prefixed framing.
///
/// The default is a 4-byte big-endian binary length that excludes itself,
/// no offset, the length field stripped on decode, and a 1 MiB payload
/// ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthFieldCodec {
    field_length: usize,
    byte_order: ByteOrder,
    format: LengthFormat,
    max_frame_size: usize,
    // encoder
    encode_adjustment: i64,
    includes_header: bool,
    // decoder
    length_field_offset: usize,
    decode_adjustment: i64,
    initial_bytes_to_strip: Option<usize>,
}

impl Default for LengthFieldCodec {
    fn default() -> Self {
        Self {
            field_length: 4,
            byte_order: ByteOrder::Big,
            format: LengthFormat::Binary,
            max_frame_size: MAX_FRAME_SIZE,
            encode_adjustment: 0,
            includes_header: false,
            length_field_offset: 0,
            decode_adjustment: 0,
            initial_bytes_to_strip: None,
        }
    }
}

impl LengthFieldCodec {
    /// Set the width of the length field.
    pub fn with_field_length(mut self, field_length: usize) -> Result<Self, FrameError> {
        if !matches!(field_length, 1 | 2 | 3 | 4 | 8) {
            return Err(FrameError::UnsupportedLengthField(field_length));
        }
        if field_length == 1 && self.format == LengthFormat::Ascii {
            return Err(FrameError::AsciiUnsupported);
        }
        self.field_length = field_length;
        Ok(self)
    }

    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn with_format(mut self, format: LengthFormat) -> Result<Self, FrameError> {
        if format == LengthFormat::Ascii && self.field_length == 1 {
            return Err(FrameError::AsciiUnsupported);
        }
        self.format = format;
        Ok(self)
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Value the encoder adds to the payload length.
    pub fn with_encode_adjustment(mut self, adjustment: i64) -> Self {
        self.encode_adjustment = adjustment;
        self
    }

    /// Make the encoder count the length field itself in the written length.
    pub fn with_length_includes_header(mut self, includes_header: bool) -> Self {
        self.includes_header = includes_header;
        self
    }

    /// Number of leading bytes the decoder skips before the length field.
    pub fn with_length_field_offset(mut self, offset: usize) -> Self {
        self.length_field_offset = offset;
        self
    }

    /// Value the decoder adds to the field to get the bytes that follow it.
    pub fn with_decode_adjustment(mut self, adjustment: i64) -> Self {
        self.decode_adjustment = adjustment;
        self
    }

    /// Bytes removed from the front of each decoded frame. `None` strips
    /// the offset bytes and the length field.
    pub fn with_initial_bytes_to_strip(mut self, strip: Option<usize>) -> Self {
        self.initial_bytes_to_strip = strip;
        self
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Append the length field and `payload` to `dst`.
    pub fn encode(&self, payload: &[u8], dst: &mut BytesMut) -> Result<(), FrameError> {
        if payload.len() > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size: payload.len() as u64,
                max: self.max_frame_size,
            });
        }

        let mut length = payload.len() as i128 + i128::from(self.encode_adjustment);
        if self.includes_header {
            length += self.field_length as i128;
        }
        if length < 0 {
            return Err(FrameError::NegativeLength(length));
        }
        let length = u64::try_from(length).map_err(|_| FrameError::LengthOverflow {
            length: u64::MAX,
            field_length: self.field_length,
        })?;

        let header = self.write_length(length)?;
        dst.reserve(header.len() + payload.len());
        dst.put_slice(&header);
        dst.put_slice(payload);
        Ok(())
    }

    /// Try to decode one frame from the start of `src`.
    ///
    /// The declared length is checked against the maximum as soon as the
    /// field is complete, before any payload bytes arrive.
    pub fn decode(&self, src: &[u8]) -> Result<Decoded, FrameError> {
        let header_end = self.length_field_offset + self.field_length;
        if src.len() < header_end {
            return Ok(Decoded::Incomplete);
        }

        let raw = self.read_length(&src[self.length_field_offset..header_end])?;
        let length = i128::from(raw) + i128::from(self.decode_adjustment);
        if length < 0 {
            return Err(FrameError::NegativeLength(length));
        }
        if length > self.max_frame_size as i128 {
            return Err(FrameError::FrameTooLarge {
                size: u64::try_from(length).unwrap_or(u64::MAX),
                max: self.max_frame_size,
            });
        }

        let total = header_end + length as usize;
        let strip = self.initial_bytes_to_strip.unwrap_or(header_end);
        if strip > total {
            return Err(FrameError::StripTooLarge { strip, frame: total });
        }
        if src.len() < total {
            return Ok(Decoded::Incomplete);
        }

        Ok(Decoded::Frame {
            payload: Bytes::copy_from_slice(&src[strip..total]),
            consumed: total,
        })
    }

    fn write_length(&self, length: u64) -> Result<Vec<u8>, FrameError> {
        let width = self.field_length;
        let overflow = FrameError::LengthOverflow {
            length,
            field_length: width,
        };

        match self.format {
            LengthFormat::Ascii => {
                let digits = format!("{length:0width$}");
                if digits.len() > width {
                    return Err(overflow);
                }
                Ok(digits.into_bytes())
            }
            LengthFormat::Binary => {
                if width < 8 && length >> (width * 8) != 0 {
                    return Err(overflow);
                }
                Ok(match self.byte_order {
                    ByteOrder::Big => length.to_be_bytes()[8 - width..].to_vec(),
                    ByteOrder::Little => length.to_le_bytes()[..width].to_vec(),
                })
            }
        }
    }

    fn read_length(&self, field: &[u8]) -> Result<u64, FrameError> {
        match self.format {
            LengthFormat::Ascii => {
                if !field.iter().all(u8::is_ascii_digit) {
                    return Err(FrameError::InvalidLength);
                }
                std::str::from_utf8(field)
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(FrameError::InvalidLength)
            }
            LengthFormat::Binary => {
                let mut buf = [0u8; 8];
                Ok(match self.byte_order {
                    ByteOrder::Big => {
                        buf[8 - field.len()..].copy_from_slice(field);
                        u64::from_be_bytes(buf)
                    }
                    ByteOrder::Little => {
                        buf[..field.len()].copy_from_slice(field);
                        u64::from_le_bytes(buf)
                    }
                })
            }
        }
    }
}
