//! Per-connection framing state machine.
//!
//! A `Connection` owns the stream, an inbound buffer that accumulates
//! partial frames and an outbound buffer for the pending reply. It is
//! either `Open` or `Closed`; once closed it never reads, writes or calls
//! back into application code again.
//!
//! Messages are handled strictly one at a time: the next frame is not
//! decoded until the reply to the previous one has been flushed, so
//! replies leave in the order their requests were decoded.

use crate::codec::{Codec, Decoded};
use crate::error::ConnectionError;
use bytes::{Buf, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Read buffer size
const BUFFER_SIZE: usize = 16 * 1024;

/// A decoded application message.
pub type Message = String;

/// Current state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Open,
    Closed,
}

/// A framed connection over any async byte stream.
#[derive(Debug)]
pub struct Connection<S> {
    stream: S,
    codec: Codec,
    state: ConnState,
    inbound: BytesMut,
    // Leading inbound bytes already searched without finding a frame
    scanned: usize,
    outbound: BytesMut,
    idle_timeout: Option<Duration>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a new connection in the `Open` state.
    pub fn new(stream: S, codec: Codec) -> Self {
        Self {
            stream,
            codec,
            state: ConnState::Open,
            inbound: BytesMut::with_capacity(BUFFER_SIZE),
            scanned: 0,
            outbound: BytesMut::new(),
            idle_timeout: None,
        }
    }

    /// Close the connection if no bytes arrive for `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnState::Open
    }

    /// Read the next message.
    ///
    /// Returns `Ok(None)` when the peer closes cleanly between frames. Any
    /// error, and a clean close, leaves the connection `Closed`.
    pub async fn read_message(&mut self) -> Result<Option<Message>, ConnectionError> {
        self.ensure_open()?;

        loop {
            match self.codec.decode_from(&self.inbound, self.scanned) {
                Ok(Decoded::Frame { payload, consumed }) => {
                    self.inbound.advance(consumed);
                    self.scanned = 0;
                    return match String::from_utf8(payload.to_vec()) {
                        Ok(message) => Ok(Some(message)),
                        Err(e) => Err(self.fail(e.into()).await),
                    };
                }
                Ok(Decoded::Incomplete) => self.scanned = self.inbound.len(),
                Err(e) => return Err(self.fail(e.into()).await),
            }

            let n = match self.fill().await {
                Ok(n) => n,
                Err(e) => return Err(self.fail(e).await),
            };

            if n == 0 {
                let partial = !self.inbound.is_empty();
                self.close().await;
                if partial {
                    // Peer went away in the middle of a frame
                    return Err(ConnectionError::ConnectionClosed);
                }
                trace!("Connection closed by peer");
                return Ok(None);
            }
        }
    }

    /// Encode `message` into the outbound buffer and flush it.
    pub async fn write_message(&mut self, message: &str) -> Result<(), ConnectionError> {
        self.ensure_open()?;

        if let Err(e) = self.codec.encode(message.as_bytes(), &mut self.outbound) {
            return Err(self.fail(e.into()).await);
        }

        if let Err(e) = self.flush().await {
            return Err(self.fail(e).await);
        }
        Ok(())
    }

    /// Reply to every inbound message with `on_message` until the peer
    /// closes the connection or an error closes it.
    pub async fn run<F>(&mut self, mut on_message: F) -> Result<(), ConnectionError>
    where
        F: FnMut(Message) -> Message,
    {
        while let Some(message) = self.read_message().await? {
            let reply = on_message(message);
            self.write_message(&reply).await?;
        }
        Ok(())
    }

    /// Shut down the write half while still reading whatever the peer sends.
    pub async fn finish_writes(&mut self) -> Result<(), ConnectionError> {
        self.ensure_open()?;
        if let Err(e) = self.stream.shutdown().await {
            return Err(self.fail(e.into()).await);
        }
        Ok(())
    }

    /// Transition to `Closed`, release buffers and shut the stream down.
    ///
    /// Closing twice is a no-op.
    pub async fn close(&mut self) {
        if self.state == ConnState::Closed {
            return;
        }
        self.state = ConnState::Closed;
        self.inbound = BytesMut::new();
        self.scanned = 0;
        self.outbound = BytesMut::new();

        if let Err(e) = self.stream.shutdown().await {
            trace!(error = %e, "Shutdown failed");
        }
    }

    fn ensure_open(&self) -> Result<(), ConnectionError> {
        match self.state {
            ConnState::Open => Ok(()),
            ConnState::Closed => Err(ConnectionError::ConnectionClosed),
        }
    }

    async fn fail(&mut self, error: ConnectionError) -> ConnectionError {
        self.close().await;
        error
    }

    async fn fill(&mut self) -> Result<usize, ConnectionError> {
        let read = self.stream.read_buf(&mut self.inbound);
        match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| ConnectionError::IdleTimeout(limit))?
                .map_err(ConnectionError::from),
            None => read.await.map_err(ConnectionError::from),
        }
    }

    async fn flush(&mut self) -> Result<(), ConnectionError> {
        self.stream.write_all(&self.outbound).await?;
        self.stream.flush().await?;
        self.outbound.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, DelimiterCodec, LengthFieldCodec};
    use crate::error::FrameError;
    use tokio_test::io::Builder;

    fn frame(payload: &[u8]) -> Vec<u8> {
        codec::encode(payload).unwrap().to_vec()
    }

    #[tokio::test]
    async fn test_reply_in_order() {
        let mut inbound = frame(b"hello");
        inbound.extend_from_slice(&frame(b"world"));

        let mock = Builder::new()
            .read(&inbound)
            .write(&frame(b"re:hello"))
            .write(&frame(b"re:world"))
            .build();

        let mut conn = Connection::new(mock, Codec::default());
        conn.run(|m| format!("re:{m}")).await.unwrap();
        assert_eq!(conn.state(), ConnState::Closed);
    }

    #[tokio::test]
    async fn test_partial_reads_assemble_frame() {
        let bytes = frame(b"hello");
        let mock = Builder::new()
            .read(&bytes[..2])
            .read(&bytes[2..6])
            .read(&bytes[6..])
            .build();

        let mut conn = Connection::new(mock, Codec::default());
        assert_eq!(conn.read_message().await.unwrap(), Some("hello".to_string()));
        assert!(conn.is_open());
        assert_eq!(conn.read_message().await.unwrap(), None);
        assert_eq!(conn.state(), ConnState::Closed);
    }

    #[tokio::test]
    async fn test_oversize_header_closes_without_reply() {
        let mock = Builder::new().read(&2_000_000u32.to_be_bytes()).build();

        let mut calls = 0;
        let mut conn = Connection::new(mock, Codec::default());
        let result = conn
            .run(|m| {
                calls += 1;
                m
            })
            .await;

        assert!(matches!(
            result,
            Err(ConnectionError::Frame(FrameError::FrameTooLarge {
                size: 2_000_000,
                ..
            }))
        ));
        assert_eq!(calls, 0);
        assert_eq!(conn.state(), ConnState::Closed);
    }

    #[tokio::test]
    async fn test_invalid_utf8_closes() {
        let mock = Builder::new().read(&frame(&[0xff, 0xfe])).build();

        let mut conn = Connection::new(mock, Codec::default());
        assert!(matches!(
            conn.read_message().await,
            Err(ConnectionError::Encoding(_))
        ));
        assert_eq!(conn.state(), ConnState::Closed);
    }

    #[tokio::test]
    async fn test_eof_mid_frame() {
        let mock = Builder::new().read(b"\x00\x00\x00\x05he").build();

        let mut conn = Connection::new(mock, Codec::default());
        assert!(matches!(
            conn.read_message().await,
            Err(ConnectionError::ConnectionClosed)
        ));
        assert_eq!(conn.state(), ConnState::Closed);
    }

    #[tokio::test]
    async fn test_closed_rejects_operations() {
        let mock = Builder::new().build();

        let mut conn = Connection::new(mock, Codec::default());
        conn.close().await;
        conn.close().await;

        assert!(matches!(
            conn.read_message().await,
            Err(ConnectionError::ConnectionClosed)
        ));
        assert!(matches!(
            conn.write_message("hello").await,
            Err(ConnectionError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_write_error_closes() {
        let mock = Builder::new()
            .write_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "broken pipe",
            ))
            .build();

        let mut conn = Connection::new(mock, Codec::default());
        assert!(matches!(
            conn.write_message("hello").await,
            Err(ConnectionError::Io(_))
        ));
        assert_eq!(conn.state(), ConnState::Closed);
    }

    #[tokio::test]
    async fn test_oversize_reply_closes() {
        let codec = Codec::LengthField(LengthFieldCodec::default().with_max_frame_size(4));
        let mock = Builder::new().build();

        let mut conn = Connection::new(mock, codec);
        assert!(matches!(
            conn.write_message("hello").await,
            Err(ConnectionError::Frame(FrameError::FrameTooLarge { .. }))
        ));
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_line_framing() {
        let mock = Builder::new()
            .read(b"hello\nwor")
            .read(b"ld\n")
            .write(b"HELLO\n")
            .write(b"WORLD\n")
            .build();

        let mut conn = Connection::new(mock, Codec::Delimiter(DelimiterCodec::lines()));
        conn.run(|m| m.to_uppercase()).await.unwrap();
    }

    #[tokio::test]
    async fn test_line_framing_many_small_reads() {
        let mock = Builder::new()
            .read(b"ab")
            .read(b"c")
            .read(b"d\nef")
            .read(b"\ngh")
            .read(b"i")
            .read(b"\n")
            .write(b"abcd!\n")
            .write(b"ef!\n")
            .write(b"ghi!\n")
            .build();

        let mut conn = Connection::new(mock, Codec::Delimiter(DelimiterCodec::lines()));
        conn.run(|m| format!("{m}!")).await.unwrap();
        assert_eq!(conn.scanned, 0);
    }

    #[tokio::test]
    async fn test_scan_cursor_tracks_partial_line() {
        let mock = Builder::new().read(b"abc\nde").read(b"f").build();

        let mut conn = Connection::new(mock, Codec::Delimiter(DelimiterCodec::lines()));
        assert_eq!(conn.read_message().await.unwrap(), Some("abc".to_string()));
        assert_eq!(conn.scanned, 0);

        // "def" never terminated: EOF mid-frame after two scans
        assert!(matches!(
            conn.read_message().await,
            Err(ConnectionError::ConnectionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout() {
        let (_peer, stream) = tokio::io::duplex(64);

        let mut conn = Connection::new(stream, Codec::default())
            .with_idle_timeout(Some(Duration::from_secs(5)));

        assert!(matches!(
            conn.read_message().await,
            Err(ConnectionError::IdleTimeout(d)) if d == Duration::from_secs(5)
        ));
        assert_eq!(conn.state(), ConnState::Closed);
    }
}
