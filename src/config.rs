//! Configuration module for framed-echo.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::codec::{
    ByteOrder, Codec, DelimiterCodec, FixedLengthCodec, LengthFieldCodec, LengthFormat,
    MAX_FRAME_SIZE,
};
use crate::error::FrameError;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Which side of the protocol to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Role {
    #[default]
    Server,
    Client,
}

/// Framing rule used on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FramingKind {
    #[default]
    LengthField,
    Line,
    Delimiter,
    Fixed,
}

/// Command-line arguments
#[derive(Parser, Debug, Default)]
#[command(name = "framed-echo")]
#[command(author = "framed-echo authors")]
#[command(version = "0.1.0")]
#[command(about = "Length-prefixed framing echo server and client", long_about = None)]
pub struct CliArgs {
    /// Run as server or client
    #[arg(value_enum, default_value_t = Role::Server)]
    pub role: Role,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to (server) or connect to (client)
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// TCP port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Disable Nagle's algorithm on connected sockets
    #[arg(long)]
    pub nodelay: Option<bool>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Close connections idle for this many seconds (0 = never)
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Framing rule (fixed is client-only: echo replies change the length)
    #[arg(long, value_enum)]
    pub framing: Option<FramingKind>,

    /// Maximum frame payload size in bytes
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub framing: FramingConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Address and socket options shared by server and client
#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            nodelay: default_nodelay(),
        }
    }
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Number of worker threads
    pub workers: Option<usize>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Idle timeout in seconds (0 = disabled)
    #[serde(default)]
    pub idle_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: None,
            max_connections: default_max_connections(),
            idle_timeout: 0,
        }
    }
}

/// Framing configuration
#[derive(Debug, Deserialize)]
pub struct FramingConfig {
    #[serde(default)]
    pub kind: FramingKind,
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    #[serde(default = "default_length_field_length")]
    pub length_field_length: usize,
    #[serde(default)]
    pub byte_order: ByteOrder,
    #[serde(default)]
    pub format: LengthFormat,
    /// Length-field options applied when writing frames
    #[serde(default)]
    pub encoder: EncoderConfig,
    /// Length-field options applied when reading frames
    #[serde(default)]
    pub decoder: DecoderConfig,
    /// Delimiter byte for `delimiter` framing
    #[serde(default = "default_delimiter")]
    pub delimiter: u8,
    /// Frame length for `fixed` framing
    pub frame_length: Option<usize>,
}

impl Default for FramingConfig {
    fn default() -> Self {
        Self {
            kind: FramingKind::default(),
            max_frame_size: default_max_frame_size(),
            length_field_length: default_length_field_length(),
            byte_order: ByteOrder::default(),
            format: LengthFormat::default(),
            encoder: EncoderConfig::default(),
            decoder: DecoderConfig::default(),
            delimiter: default_delimiter(),
            frame_length: None,
        }
    }
}

/// `[framing.encoder]`: how the length field is written
#[derive(Debug, Default, Deserialize)]
pub struct EncoderConfig {
    /// Added to the payload length before it is written
    #[serde(default)]
    pub length_adjustment: i64,
    /// Written length counts the length field itself
    #[serde(default)]
    pub length_includes_header: bool,
}

/// `[framing.decoder]`: how the length field is read
#[derive(Debug, Default, Deserialize)]
pub struct DecoderConfig {
    /// Bytes preceding the length field
    #[serde(default)]
    pub length_field_offset: usize,
    /// Added to the field value to get the bytes following the field
    #[serde(default)]
    pub length_adjustment: i64,
    /// Bytes stripped from each decoded frame (default: offset + field)
    pub initial_bytes_to_strip: Option<usize>,
}

impl FramingConfig {
    /// Build the codec described by this section.
    pub fn build_codec(&self) -> Result<Codec, ConfigError> {
        let codec = match self.kind {
            FramingKind::LengthField => Codec::LengthField(
                LengthFieldCodec::default()
                    .with_format(self.format)?
                    .with_field_length(self.length_field_length)?
                    .with_byte_order(self.byte_order)
                    .with_max_frame_size(self.max_frame_size)
                    .with_encode_adjustment(self.encoder.length_adjustment)
                    .with_length_includes_header(self.encoder.length_includes_header)
                    .with_length_field_offset(self.decoder.length_field_offset)
                    .with_decode_adjustment(self.decoder.length_adjustment)
                    .with_initial_bytes_to_strip(self.decoder.initial_bytes_to_strip),
            ),
            FramingKind::Line => {
                Codec::Delimiter(DelimiterCodec::lines().with_max_frame_size(self.max_frame_size))
            }
            FramingKind::Delimiter => Codec::Delimiter(
                DelimiterCodec::new(self.delimiter).with_max_frame_size(self.max_frame_size),
            ),
            FramingKind::Fixed => {
                let frame_length = self.frame_length.ok_or(ConfigError::MissingFrameLength)?;
                if frame_length > self.max_frame_size {
                    return Err(FrameError::FrameTooLarge {
                        size: frame_length as u64,
                        max: self.max_frame_size,
                    }
                    .into());
                }
                Codec::FixedLength(FixedLengthCodec::new(frame_length)?)
            }
        };
        Ok(codec)
    }
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    /// Messages sent, in order, right after connecting
    #[serde(default = "default_messages")]
    pub messages: Vec<String>,
    /// Wait for one reply per message before closing
    #[serde(default = "default_await_replies")]
    pub await_replies: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            messages: default_messages(),
            await_replies: default_await_replies(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9981
}

fn default_nodelay() -> bool {
    true
}

fn default_max_connections() -> usize {
    10000
}

fn default_max_frame_size() -> usize {
    MAX_FRAME_SIZE
}

fn default_length_field_length() -> usize {
    4
}

fn default_delimiter() -> u8 {
    b'\n'
}

fn default_messages() -> Vec<String> {
    vec!["hello".to_string(), "world".to_string()]
}

fn default_await_replies() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub role: Role,
    pub host: String,
    pub port: u16,
    pub nodelay: bool,
    pub workers: Option<usize>,
    pub max_connections: usize,
    pub idle_timeout: Option<Duration>,
    pub codec: Codec,
    pub messages: Vec<String>,
    pub await_replies: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: Role::Server,
            host: default_host(),
            port: default_port(),
            nodelay: default_nodelay(),
            workers: None,
            max_connections: default_max_connections(),
            idle_timeout: None,
            codec: Codec::default(),
            messages: default_messages(),
            await_replies: default_await_replies(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::resolve(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence).
    pub fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let TomlConfig {
            network,
            server,
            mut framing,
            client,
            logging,
        } = toml_config;

        if let Some(kind) = cli.framing {
            framing.kind = kind;
        }
        if let Some(max_frame_size) = cli.max_frame_size {
            framing.max_frame_size = max_frame_size;
        }

        let idle_secs = cli.idle_timeout.unwrap_or(server.idle_timeout);
        let codec = framing.build_codec()?;

        // Timestamped replies are longer than the request, so they never fit
        // the frame length the peer expects
        if cli.role == Role::Server && matches!(codec, Codec::FixedLength(_)) {
            return Err(ConfigError::FixedFramingServer);
        }

        Ok(Config {
            role: cli.role,
            host: cli.host.unwrap_or(network.host),
            port: cli.port.unwrap_or(network.port),
            nodelay: cli.nodelay.unwrap_or(network.nodelay),
            // 0 means "one per core", same as unset
            workers: cli.workers.or(server.workers).filter(|&n| n > 0),
            max_connections: cli.max_connections.unwrap_or(server.max_connections),
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            codec,
            messages: client.messages,
            await_replies: client.await_replies,
            log_level: cli.log_level.unwrap_or(logging.level),
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),

    #[error("Invalid framing configuration: {0}")]
    Framing(#[from] FrameError),

    #[error("Fixed framing requires framing.frame_length")]
    MissingFrameLength,

    #[error("Fixed framing cannot carry echo replies; use it with the client role only")]
    FixedFramingServer,
}
