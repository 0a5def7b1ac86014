//! TCP server for the timestamping echo protocol.
//!
//! Accepts connections and hands each one to its own task, which drives a
//! `Connection` that answers every message with `<epoch-millis>:<message>`.

use crate::codec::Codec;
use crate::config::Config;
use crate::connection::Connection;
use crate::registry::{Registration, SharedRegistry};
use chrono::Utc;
use std::future::Future;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

/// Listen backlog for the server socket
const LISTEN_BACKLOG: i32 = 1024;

/// Build the echo reply for `message` using the current wall-clock time.
pub fn echo_reply(message: &str) -> String {
    format!("{}:{}", Utc::now().timestamp_millis(), message)
}

/// Server instance
#[derive(Debug)]
pub struct Server {
    config: Config,
    registry: SharedRegistry,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config) -> Self {
        let registry = SharedRegistry::new(config.max_connections);
        Server { config, registry }
    }

    /// Live connection registry.
    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Bind the listening socket described by the configuration.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn bind(&self) -> io::Result<TcpListener> {
        let addr = resolve(&self.config.host, self.config.port)?;
        let listener = create_listener(addr)?;
        TcpListener::from_std(listener)
    }

    /// Bind and serve until Ctrl-C.
    pub async fn run(&self) -> io::Result<()> {
        let listener = self.bind()?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Accept connections on `listener` until `shutdown` completes.
    ///
    /// On shutdown, connection tasks still running are aborted, which drops
    /// and closes their sockets.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        info!(address = %listener.local_addr()?, "Server listening");

        tokio::pin!(shutdown);
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(&mut tasks, stream, peer),
                    Err(e) => error!(error = %e, "Failed to accept connection"),
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Connection task failed");
                    }
                }
            }
        }

        tasks.shutdown().await;
        Ok(())
    }

    fn spawn_connection(&self, tasks: &mut JoinSet<()>, stream: TcpStream, peer: SocketAddr) {
        let Some(registration) = self.registry.register(peer) else {
            warn!(peer = %peer, "Connection limit reached, rejecting connection");
            return;
        };

        if let Err(e) = stream.set_nodelay(self.config.nodelay) {
            warn!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
        }

        debug!(peer = %peer, conn_id = registration.id(), "New connection");

        let codec = self.config.codec.clone();
        let idle_timeout = self.config.idle_timeout;
        tasks.spawn(handle_connection(stream, peer, codec, idle_timeout, registration));
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    codec: Codec,
    idle_timeout: Option<Duration>,
    registration: Registration,
) {
    let mut conn = Connection::new(stream, codec).with_idle_timeout(idle_timeout);

    let result = conn
        .run(|message| {
            debug!(peer = %peer, %message, "Received message");
            echo_reply(&message)
        })
        .await;

    let connected_ms = registration
        .connected_for()
        .map(|d| d.num_milliseconds())
        .unwrap_or_default();

    match result {
        Ok(()) => trace!(peer = %peer, connected_ms, "Connection closed by client"),
        Err(e) => debug!(peer = %peer, connected_ms, error = %e, "Connection error"),
    }
}

fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port).to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no address found for {host}:{port}"),
        )
    })
}

fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
