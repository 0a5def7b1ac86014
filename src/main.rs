//! framed-echo: echo server and client for length-prefixed frames
//!
//! The server answers every frame with `<epoch-millis>:<message>`.
//! The client connects, sends `hello` and `world`, and exits once the
//! connection is closed.

use framed_echo::{Client, Config, Role, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        role = ?config.role,
        host = %config.host,
        port = config.port,
        framing = config.codec.kind(),
        max_frame_size = config.codec.max_frame_size(),
        nodelay = config.nodelay,
        "Starting framed-echo"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.build()?;

    match config.role {
        Role::Server => runtime.block_on(run_server(config)),
        Role::Client => runtime.block_on(run_client(config)),
    }
}

async fn run_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::new(config);
    server.run().await?;
    Ok(())
}

async fn run_client(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let replies = Client::new(config).run().await?;
    info!(replies = replies.len(), "Client finished");
    Ok(())
}
