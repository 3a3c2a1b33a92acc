//! Error types shared by keystep crates

use thiserror::Error;

/// Result type alias using the keystep common Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading configuration or shaping scenario data
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config encode error: {0}")]
    ConfigEncode(#[from] toml::ser::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown environment: {0}")]
    UnknownEnvironment(String),

    #[error("Missing secret: environment variable {0} is not set")]
    MissingSecret(String),
}
