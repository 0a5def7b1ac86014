//! Error types for framing and connection handling.
//!
//! Every error is local to the connection that produced it; nothing here
//! is ever surfaced to another connection.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while encoding or decoding frames.
///
/// Any of these on the read path leaves the stream cursor in an unknown
/// position, so the connection is closed rather than resynchronized.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Declared or actual payload length exceeds the configured maximum.
    #[error("frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { size: u64, max: usize },

    #[error("unsupported length field length {0} (expected: 1, 2, 3, 4, or 8)")]
    UnsupportedLengthField(usize),

    #[error("adjusted frame length {0} is less than zero")]
    NegativeLength(i128),

    #[error("length {length} does not fit into a {field_length}-byte length field")]
    LengthOverflow { length: u64, field_length: usize },

    #[error("length field is not a decimal number")]
    InvalidLength,

    #[error("cannot strip {strip} bytes from a {frame}-byte frame")]
    StripTooLarge { strip: usize, frame: usize },

    #[error("ascii format is not allowed for a 1-byte length field")]
    AsciiUnsupported,

    #[error("payload of {len} bytes is not a multiple of the fixed frame length {frame_length}")]
    UnexpectedFixedLength { len: usize, frame_length: usize },

    #[error("fixed frame length must be greater than zero")]
    ZeroFrameLength,

    #[error("payload contains the frame delimiter {0:#04x}")]
    DelimiterInPayload(u8),
}

/// Errors that end a connection.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Malformed or oversized frame.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Peer closed the connection mid-frame, or the connection was already
    /// closed when an operation was attempted.
    #[error("connection closed")]
    ConnectionClosed,

    /// Network failure during read, write or connect.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame payload is not valid UTF-8.
    #[error("message is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("connection idle for {0:?}")]
    IdleTimeout(Duration),
}
