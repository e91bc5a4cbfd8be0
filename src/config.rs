//! Configuration for the wordserve server and client.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values, which take
//! precedence over built-in defaults.

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(name = "wordserve")]
#[command(version = "0.1.0")]
#[command(about = "A word-list chunk server with pluggable request scheduling", long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Serve the word list over TCP
    Server(ServerArgs),
    /// Download the word list in chunks
    Client(ClientArgs),
}

/// Scheduling discipline for pending requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchedulingMode {
    /// One global queue, strict system-wide arrival order.
    Fcfs,
    /// One request per connection per turn, in accept order.
    RoundRobin,
}

/// Server subcommand arguments.
#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:9090)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Path to the word-list file
    #[arg(short, long)]
    pub words: Option<PathBuf>,

    /// Scheduling discipline
    #[arg(short, long, value_enum)]
    pub mode: Option<SchedulingMode>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Client subcommand arguments.
#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Path to TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Server address to connect to (e.g., 127.0.0.1:9090)
    #[arg(long)]
    pub connect: Option<String>,

    /// Starting offset into the word list
    #[arg(short = 'p', long)]
    pub start_offset: Option<usize>,

    /// Words requested per chunk
    #[arg(short = 'k', long)]
    pub chunk_size: Option<usize>,

    /// Requests kept in flight per batch (1 = plain, >1 = greedy)
    #[arg(short = 'c', long)]
    pub batch: Option<usize>,

    /// Maximum reconnect attempts after a transport failure
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Base reconnect backoff in milliseconds (grows per attempt)
    #[arg(long)]
    pub retry_backoff_ms: Option<u64>,

    /// Suppress the per-word frequency output
    #[arg(short, long)]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure.
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_words")]
    pub words: PathBuf,
    #[serde(default = "default_mode")]
    pub mode: SchedulingMode,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            words: default_words(),
            mode: default_mode(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_listen")]
    pub connect: String,
    #[serde(default)]
    pub start_offset: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_batch")]
    pub batch: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            connect: default_listen(),
            start_offset: 0,
            chunk_size: default_chunk_size(),
            batch: default_batch(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_words() -> PathBuf {
    PathBuf::from("words.txt")
}

fn default_mode() -> SchedulingMode {
    SchedulingMode::Fcfs
}

fn default_max_connections() -> usize {
    1024
}

fn default_chunk_size() -> usize {
    5
}

fn default_batch() -> usize {
    1
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    pub words: PathBuf,
    pub mode: SchedulingMode,
    pub max_connections: usize,
    pub log_level: String,
}

impl ServerConfig {
    /// Merge CLI args with the optional TOML file (CLI takes precedence).
    pub fn resolve(args: ServerArgs) -> Result<Self, ConfigError> {
        let toml_config = load_toml(args.config.as_deref())?;
        Ok(Self {
            listen: args.listen.unwrap_or(toml_config.server.listen),
            words: args.words.unwrap_or(toml_config.server.words),
            mode: args.mode.unwrap_or(toml_config.server.mode),
            max_connections: args
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            log_level: args.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// Final resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub connect: String,
    pub start_offset: usize,
    pub chunk_size: usize,
    pub batch: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub quiet: bool,
    pub log_level: String,
}

impl ClientConfig {
    /// Merge CLI args with the optional TOML file (CLI takes precedence).
    pub fn resolve(args: ClientArgs) -> Result<Self, ConfigError> {
        let toml_config = load_toml(args.config.as_deref())?;
        Ok(Self {
            connect: args.connect.unwrap_or(toml_config.client.connect),
            start_offset: args
                .start_offset
                .unwrap_or(toml_config.client.start_offset),
            chunk_size: args.chunk_size.unwrap_or(toml_config.client.chunk_size),
            batch: args.batch.unwrap_or(toml_config.client.batch).max(1),
            max_retries: args.max_retries.unwrap_or(toml_config.client.max_retries),
            retry_backoff_ms: args
                .retry_backoff_ms
                .unwrap_or(toml_config.client.retry_backoff_ms),
            quiet: args.quiet,
            log_level: args.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

fn load_toml(path: Option<&std::path::Path>) -> Result<TomlConfig, ConfigError> {
    match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
            toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
        }
        None => Ok(TomlConfig::default()),
    }
}

/// Configuration loading errors.
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
