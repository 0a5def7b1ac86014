//! Fixed-length framing.

use super::Decoded;
use crate::error::FrameError;
use bytes::{BufMut, Bytes, BytesMut};

/// Every frame is exactly `frame_length` bytes; there is no header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedLengthCodec {
    frame_length: usize,
}

impl FixedLengthCodec {
    pub fn new(frame_length: usize) -> Result<Self, FrameError> {
        if frame_length == 0 {
            return Err(FrameError::ZeroFrameLength);
        }
        Ok(Self { frame_length })
    }

    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    /// Write `payload` as one or more consecutive frames.
    ///
    /// The payload length must be a whole multiple of the frame length.
    pub fn encode(&self, payload: &[u8], dst: &mut BytesMut) -> Result<(), FrameError> {
        if payload.len() % self.frame_length != 0 {
            return Err(FrameError::UnexpectedFixedLength {
                len: payload.len(),
                frame_length: self.frame_length,
            });
        }
        dst.put_slice(payload);
        Ok(())
    }

    pub fn decode(&self, src: &[u8]) -> Result<Decoded, FrameError> {
        if src.len() < self.frame_length {
            return Ok(Decoded::Incomplete);
        }
        Ok(Decoded::Frame {
            payload: Bytes::copy_from_slice(&src[..self.frame_length]),
            consumed: self.frame_length,
        })
    }
}
