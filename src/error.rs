//! Error handling for chartsup.
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading, resolving or validating the provider configuration.
///
/// These never heal on their own: a missing directory stays missing until an operator
/// fixes it, so callers treat every variant as fatal for the current launch attempt.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading the configuration file.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// Path that could not be read.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A directory or file the provider needs does not exist.
    #[error("{what} {} not found", path.display())]
    MissingPath {
        /// Human-readable role of the path (e.g. "S57 data directory").
        what: &'static str,
        /// The path that was checked.
        path: PathBuf,
    },

    /// A configuration value could not be interpreted.
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue {
        /// The offending configuration key.
        key: &'static str,
        /// The raw value found.
        value: String,
    },

    /// The configuration directory could not be created.
    #[error("unable to create config dir {}: {source}", path.display())]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised when the provider process cannot be spawned.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The spawn call itself failed.
    #[error("unable to start provider with '{command}': {source}")]
    Spawn {
        /// The command line that was attempted, joined with spaces.
        command: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The pipe used to collect provider output could not be set up.
    #[error("unable to capture provider output: {0}")]
    OutputPipe(#[source] std::io::Error),

    /// The launch planner produced an empty command line.
    #[error("empty provider command line")]
    EmptyCommand,
}

/// Reasons a single health probe failed.
///
/// The supervisor does not distinguish between these; they exist so the debug log says
/// what went wrong.
#[derive(Debug, Error)]
pub enum ProbeFailure {
    /// Connection refused, DNS failure, timeout and friends.
    #[error("request to {url} failed: {message}")]
    Transport {
        /// URL that was probed.
        url: String,
        /// Error reported by the HTTP client.
        message: String,
    },

    /// The provider answered with a non-success HTTP status.
    #[error("provider answered with HTTP {0}")]
    HttpStatus(u16),

    /// The body could not be parsed as JSON.
    #[error("malformed provider response: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The payload carried a status other than `OK`.
    #[error("invalid status from provider query: {0:?}")]
    NotOk(Option<String>),

    /// The payload had no usable `items` field.
    #[error("provider response has no items list")]
    MissingItems,
}

/// Errors that terminate supervision.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Launch(#[from] LaunchError),
    #[error("unable to create HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}
