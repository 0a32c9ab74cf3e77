//! Error types, local to each component per the "no error crosses a component
//! boundary except process-fatal startup" propagation policy.

use thiserror::Error;

/// Errors raised while decoding or encoding a bus frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum CodecError {
    #[error("checksum mismatch")]
    BadChecksum,
    #[error("frame shorter than the minimum frame length")]
    Truncated,
    #[error("command body would overflow the maximum frame length")]
    FrameFull,
}

/// Errors raised while loading or validating the configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Errors raised by the persistence shim.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize/deserialize snapshot: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors raised while handling one admin session line.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum AdminError {
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("missing argument for {0:?}")]
    MissingArgument(&'static str),
    #[error("invalid numeric value {0:?}")]
    InvalidNumber(String),
    #[error("unknown setport token {0:?}")]
    UnknownToken(String),
}

/// Process-fatal errors, the only ones that reach `main`.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("cannot create data directory {path}: {source}")]
    DataDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot bind admin interface on {addr}: {source}")]
    AdminBind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}
