//! Client for the timestamping echo protocol.
//!
//! Opens one connection, sends the configured messages in order and
//! returns once the connection is closed.

use crate::config::Config;
use crate::connection::{Connection, Message};
use crate::error::ConnectionError;
use std::io::ErrorKind;
use tokio::net::TcpStream;
use tracing::{debug, info, trace};

#[derive(Debug)]
pub struct Client {
    config: Config,
}

impl Client {
    pub fn new(config: Config) -> Self {
        Client { config }
    }

    /// Connect, send every configured message, then wind down.
    ///
    /// With `await_replies` set, one reply is read per message sent and the
    /// client closes the connection itself. Otherwise it half-closes right
    /// after sending and discards whatever arrives until the server closes.
    /// Either way, whichever side closes, the run counts as a success.
    ///
    /// Returns the replies that were read.
    pub async fn run(&self) -> Result<Vec<Message>, ConnectionError> {
        let stream = TcpStream::connect((self.config.host.as_str(), self.config.port)).await?;
        stream.set_nodelay(self.config.nodelay)?;
        info!(peer = %stream.peer_addr()?, "Connected");

        let mut conn = Connection::new(stream, self.config.codec.clone());
        let mut replies = Vec::with_capacity(self.config.messages.len());

        match self.exchange(&mut conn, &mut replies).await {
            Ok(()) => {}
            Err(e) if is_disconnect(&e) => {
                debug!(error = %e, "Server closed the connection");
                conn.close().await;
            }
            Err(e) => return Err(e),
        }

        info!("Connection closed");
        Ok(replies)
    }

    async fn exchange(
        &self,
        conn: &mut Connection<TcpStream>,
        replies: &mut Vec<Message>,
    ) -> Result<(), ConnectionError> {
        for message in &self.config.messages {
            conn.write_message(message).await?;
            debug!(%message, "Sent message");
        }

        if self.config.await_replies {
            while replies.len() < self.config.messages.len() {
                match conn.read_message().await? {
                    Some(reply) => {
                        info!(%reply, "Received reply");
                        replies.push(reply);
                    }
                    None => break,
                }
            }
            conn.close().await;
        } else {
            conn.finish_writes().await?;
            while let Some(reply) = conn.read_message().await? {
                trace!(%reply, "Discarding reply");
            }
        }
        Ok(())
    }
}

/// Errors that only mean the server went away first.
fn is_disconnect(error: &ConnectionError) -> bool {
    match error {
        ConnectionError::ConnectionClosed => true,
        ConnectionError::Io(e) => matches!(
            e.kind(),
            ErrorKind::ConnectionReset
                | ErrorKind::BrokenPipe
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
        ),
        _ => false,
    }
}
