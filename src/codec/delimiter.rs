//! Delimiter-based framing.
//!
//! A frame is its payload followed by one delimiter byte. Line framing is
//! the special case of a `\n` delimiter.

use super::{Decoded, MAX_FRAME_SIZE};
use crate::error::FrameError;
use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelimiterCodec {
    delimiter: u8,
    max_frame_size: usize,
}

impl DelimiterCodec {
    pub fn new(delimiter: u8) -> Self {
        Self {
            delimiter,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Newline-terminated frames.
    pub fn lines() -> Self {
        Self::new(b'\n')
    }

    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn encode(&self, payload: &[u8], dst: &mut BytesMut) -> Result<(), FrameError> {
        if payload.len() > self.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size: payload.len() as u64,
                max: self.max_frame_size,
            });
        }
        if payload.contains(&self.delimiter) {
            return Err(FrameError::DelimiterInPayload(self.delimiter));
        }

        dst.reserve(payload.len() + 1);
        dst.put_slice(payload);
        dst.put_u8(self.delimiter);
        Ok(())
    }

    /// Split off the first delimited frame, delimiter stripped.
    ///
    /// A buffer longer than the maximum frame size with no delimiter in it
    /// can never become a valid frame and is rejected.
    pub fn decode(&self, src: &[u8]) -> Result<Decoded, FrameError> {
        self.decode_from(src, 0)
    }

    /// Same as `decode`, searching for the delimiter from `start` onwards.
    /// `start` must not be past a delimiter already in `src`.
    pub fn decode_from(&self, src: &[u8], start: usize) -> Result<Decoded, FrameError> {
        let start = start.min(src.len());
        let found = src[start..]
            .iter()
            .position(|&b| b == self.delimiter)
            .map(|pos| start + pos);

        match found {
            Some(pos) if pos > self.max_frame_size => Err(FrameError::FrameTooLarge {
                size: pos as u64,
                max: self.max_frame_size,
            }),
            Some(pos) => Ok(Decoded::Frame {
                payload: Bytes::copy_from_slice(&src[..pos]),
                consumed: pos + 1,
            }),
            None if src.len() > self.max_frame_size => Err(FrameError::FrameTooLarge {
                size: src.len() as u64,
                max: self.max_frame_size,
            }),
            None => Ok(Decoded::Incomplete),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_encode() {
        let mut dst = BytesMut::new();
        DelimiterCodec::lines().encode(b"hello", &mut dst).unwrap();
        DelimiterCodec::lines().encode(b"world", &mut dst).unwrap();
        assert_eq!(&dst[..], b"hello\nworld\n");
    }

    #[test]
    fn test_line_decode() {
        let codec = DelimiterCodec::lines();
        match codec.decode(b"hello\nworld") {
            Ok(Decoded::Frame { payload, consumed }) => {
                assert_eq!(&payload[..], b"hello");
                assert_eq!(consumed, 6);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(codec.decode(b"world"), Ok(Decoded::Incomplete));
    }

    #[test]
    fn test_custom_delimiter() {
        let codec = DelimiterCodec::new(b'|');
        match codec.decode(b"a|b|") {
            Ok(Decoded::Frame { payload, consumed }) => {
                assert_eq!(&payload[..], b"a");
                assert_eq!(consumed, 2);
            }
            other => panic!("unexpected: {:?}", other),
        }

        let mut dst = BytesMut::new();
        assert_eq!(
            codec.encode(b"a|b", &mut dst),
            Err(FrameError::DelimiterInPayload(b'|'))
        );
    }

    #[test]
    fn test_decode_from_resumes_search() {
        let codec = DelimiterCodec::lines();
        let mut buf = b"partial".to_vec();
        assert_eq!(codec.decode_from(&buf, 0), Ok(Decoded::Incomplete));

        let scanned = buf.len();
        buf.extend_from_slice(b" line\nnext");
        match codec.decode_from(&buf, scanned) {
            Ok(Decoded::Frame { payload, consumed }) => {
                assert_eq!(&payload[..], b"partial line");
                assert_eq!(consumed, 13);
            }
            other => panic!("unexpected: {:?}", other),
        }

        // Start past the end is clamped
        assert_eq!(codec.decode_from(b"abc", 10), Ok(Decoded::Incomplete));
    }

    #[test]
    fn test_decode_from_checks_oversize() {
        let codec = DelimiterCodec::lines().with_max_frame_size(4);
        assert_eq!(codec.decode_from(b"abcd", 2), Ok(Decoded::Incomplete));
        assert_eq!(
            codec.decode_from(b"abcdef\n", 4),
            Err(FrameError::FrameTooLarge { size: 6, max: 4 })
        );
    }

    #[test]
    fn test_missing_delimiter_too_large() {
        let codec = DelimiterCodec::lines().with_max_frame_size(4);
        assert_eq!(codec.decode(b"abcd"), Ok(Decoded::Incomplete));
        assert_eq!(
            codec.decode(b"abcde"),
            Err(FrameError::FrameTooLarge { size: 5, max: 4 })
        );
        assert_eq!(
            codec.decode(b"abcde\n"),
            Err(FrameError::FrameTooLarge { size: 5, max: 4 })
        );
    }
}
