//! Error types for Plume
//!
//! Host-level errors outside the extension runtime (configuration, CLI).

use thiserror::Error;

/// Errors that can occur outside the extension runtime
#[derive(Debug, Error)]
pub enum PlumeError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("Config serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Result type alias for Plume operations
pub type PlumeResult<T> = Result<T, PlumeError>;
