//! Frame codecs.
//!
//! A codec turns a payload into on-wire bytes and splits an accumulating
//! inbound buffer back into payloads. Decoding is a pure function of the
//! buffer contents: the caller owns the buffer and advances it by the
//! `consumed` count of each decoded frame.
//!
//! ## Framings
//!
//! - `LengthFieldCodec`: length prefix followed by the payload. The default
//!   is a 4-byte big-endian prefix that excludes itself:
//!
//! ```text
//! ┌──────────────┬─────────────────────────┐
//! │ len (4B)     │ payload (len bytes)     │
//! │ u32 BE       │ UTF-8 text              │
//! └──────────────┴─────────────────────────┘
//! ```
//!
//! - `DelimiterCodec`: payload terminated by a single delimiter byte
//!   (`\n` for line framing).
//! - `FixedLengthCodec`: every frame has the same length.

pub mod delimiter;
pub mod fixed;
pub mod length_field;

pub use delimiter::DelimiterCodec;
pub use fixed::FixedLengthCodec;
pub use length_field::{ByteOrder, LengthFieldCodec, LengthFormat};

use crate::error::FrameError;
use bytes::{Bytes, BytesMut};

/// Maximum payload size of a single frame (1 MiB), header excluded.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Size of the default length prefix.
pub const LENGTH_HEADER_SIZE: usize = 4;

/// Result of a decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete frame was found at the start of the buffer.
    Frame {
        /// Payload with framing bytes stripped.
        payload: Bytes,
        /// Bytes consumed from the buffer, framing included.
        consumed: usize,
    },
    /// Not enough bytes yet; nothing was consumed.
    Incomplete,
}

/// Encode `payload` with the default 4-byte big-endian length prefix.
pub fn encode(payload: &[u8]) -> Result<Bytes, FrameError> {
    let mut dst = BytesMut::with_capacity(LENGTH_HEADER_SIZE + payload.len());
    LengthFieldCodec::default().encode(payload, &mut dst)?;
    Ok(dst.freeze())
}

/// Decode one frame with the default 4-byte big-endian length prefix.
pub fn decode(buffer: &[u8]) -> Result<Decoded, FrameError> {
    LengthFieldCodec::default().decode(buffer)
}

/// Framing selected for a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Codec {
    LengthField(LengthFieldCodec),
    Delimiter(DelimiterCodec),
    FixedLength(FixedLengthCodec),
}

impl Default for Codec {
    fn default() -> Self {
        Codec::LengthField(LengthFieldCodec::default())
    }
}

impl Codec {
    /// Append the framed `payload` to `dst`.
    ///
    /// On error nothing is written to `dst`.
    pub fn encode(&self, payload: &[u8], dst: &mut BytesMut) -> Result<(), FrameError> {
        match self {
            Codec::LengthField(codec) => codec.encode(payload, dst),
            Codec::Delimiter(codec) => codec.encode(payload, dst),
            Codec::FixedLength(codec) => codec.encode(payload, dst),
        }
    }

    /// Try to decode one frame from the start of `src`.
    pub fn decode(&self, src: &[u8]) -> Result<Decoded, FrameError> {
        match self {
            Codec::LengthField(codec) => codec.decode(src),
            Codec::Delimiter(codec) => codec.decode(src),
            Codec::FixedLength(codec) => codec.decode(src),
        }
    }

    /// Like `decode`, for a caller that knows the first `scanned` bytes of
    /// `src` hold no frame boundary. Delimiter framing resumes its search
    /// there instead of rescanning the whole buffer.
    pub fn decode_from(&self, src: &[u8], scanned: usize) -> Result<Decoded, FrameError> {
        match self {
            Codec::Delimiter(codec) => codec.decode_from(src, scanned),
            _ => self.decode(src),
        }
    }

    /// Largest payload a single frame may carry.
    pub fn max_frame_size(&self) -> usize {
        match self {
            Codec::LengthField(codec) => codec.max_frame_size(),
            Codec::Delimiter(codec) => codec.max_frame_size(),
            Codec::FixedLength(codec) => codec.frame_length(),
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Codec::LengthField(_) => "length-field",
            Codec::Delimiter(codec) if codec.delimiter() == b'\n' => "line",
            Codec::Delimiter(_) => "delimiter",
            Codec::FixedLength(_) => "fixed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_hello() {
        let frame = encode(b"hello").unwrap();
        assert_eq!(&frame[..], b"\x00\x00\x00\x05hello");
    }

    #[test]
    fn test_encode_oversize() {
        let payload = vec![0u8; MAX_FRAME_SIZE + 1];
        assert_eq!(
            encode(&payload),
            Err(FrameError::FrameTooLarge {
                size: (MAX_FRAME_SIZE + 1) as u64,
                max: MAX_FRAME_SIZE,
            })
        );
    }

    #[test]
    fn test_encode_max_size_accepted() {
        let payload = vec![7u8; MAX_FRAME_SIZE];
        let frame = encode(&payload).unwrap();
        assert_eq!(frame.len(), MAX_FRAME_SIZE + LENGTH_HEADER_SIZE);
    }

    #[test]
    fn test_decode_oversize_header() {
        // 2,000,000 declared, body never sent
        let header = 2_000_000u32.to_be_bytes();
        assert_eq!(
            decode(&header),
            Err(FrameError::FrameTooLarge {
                size: 2_000_000,
                max: MAX_FRAME_SIZE,
            })
        );
    }

    #[test]
    fn test_decode_exactly_max_size() {
        let mut buf = (MAX_FRAME_SIZE as u32).to_be_bytes().to_vec();
        assert_eq!(decode(&buf), Ok(Decoded::Incomplete));

        buf.resize(LENGTH_HEADER_SIZE + MAX_FRAME_SIZE, b'x');
        match decode(&buf).unwrap() {
            Decoded::Frame { payload, consumed } => {
                assert_eq!(payload.len(), MAX_FRAME_SIZE);
                assert_eq!(consumed, MAX_FRAME_SIZE + LENGTH_HEADER_SIZE);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_decode_one_over_max_size() {
        let header = (MAX_FRAME_SIZE as u32 + 1).to_be_bytes();
        assert_eq!(
            decode(&header),
            Err(FrameError::FrameTooLarge {
                size: MAX_FRAME_SIZE as u64 + 1,
                max: MAX_FRAME_SIZE,
            })
        );
    }

    #[test]
    fn test_decode_leaves_trailing_bytes() {
        let mut buf = encode(b"hello").unwrap().to_vec();
        buf.extend_from_slice(&encode(b"world").unwrap());

        match decode(&buf).unwrap() {
            Decoded::Frame { payload, consumed } => {
                assert_eq!(&payload[..], b"hello");
                assert_eq!(consumed, 9);
                match decode(&buf[consumed..]).unwrap() {
                    Decoded::Frame { payload, .. } => assert_eq!(&payload[..], b"world"),
                    other => panic!("unexpected: {:?}", other),
                }
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_codec_kind() {
        assert_eq!(Codec::default().kind(), "length-field");
        assert_eq!(Codec::Delimiter(DelimiterCodec::lines()).kind(), "line");
        assert_eq!(Codec::Delimiter(DelimiterCodec::new(0)).kind(), "delimiter");
        assert_eq!(Codec::default().max_frame_size(), MAX_FRAME_SIZE);
    }

    proptest! {
        #[test]
        fn prop_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let frame = encode(&payload).unwrap();
            prop_assert_eq!(
                decode(&frame).unwrap(),
                Decoded::Frame {
                    payload: Bytes::from(payload.clone()),
                    consumed: payload.len() + LENGTH_HEADER_SIZE,
                }
            );
        }

        #[test]
        fn prop_byte_at_a_time(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            let frame = encode(&payload).unwrap();
            let mut buffer = Vec::new();
            let mut frames = 0;

            for (i, byte) in frame.iter().enumerate() {
                buffer.push(*byte);
                match decode(&buffer).unwrap() {
                    Decoded::Incomplete => prop_assert!(i + 1 < frame.len()),
                    Decoded::Frame { payload: decoded, consumed } => {
                        prop_assert_eq!(i + 1, frame.len());
                        prop_assert_eq!(&decoded[..], &payload[..]);
                        prop_assert_eq!(consumed, frame.len());
                        frames += 1;
                    }
                }
            }

            prop_assert_eq!(frames, 1);
        }
    }
}
