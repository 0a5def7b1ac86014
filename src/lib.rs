//! framed-echo: length-prefixed message framing over TCP.
//!
//! - `codec`: frame encoding/decoding (length field, delimiter, fixed length)
//! - `connection`: per-connection read/decode/reply state machine
//! - `server`: echo server replying `<epoch-millis>:<message>`
//! - `client`: sends a fixed sequence of messages over one connection
//!
//! Configuration comes from CLI arguments and an optional TOML file.

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod registry;
pub mod server;

pub use client::Client;
pub use codec::{Codec, Decoded, MAX_FRAME_SIZE};
pub use config::{Config, Role};
pub use connection::{ConnState, Connection, Message};
pub use error::{ConnectionError, FrameError};
pub use server::Server;
