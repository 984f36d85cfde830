//! Error types for the extension host.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the extension host.
#[derive(Debug, Error)]
pub enum ExtensionError {
    /// Empty or malformed argument, rejected before any IO.
    #[error("Invalid argument: {0}")]
    Validation(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Namespace already held by another extension; the existing claim is kept.
    #[error("API namespace '{namespace}' is already registered by extension '{owner}'")]
    CapabilityConflict { namespace: String, owner: String },

    /// The extension's own activate/deactivate code failed.
    #[error("Extension '{extension}' failed: {message}")]
    Lifecycle { extension: String, message: String },

    #[error("No library is currently open")]
    NoLibraryOpen,

    #[error("Extension '{0}' is not installed")]
    NotInstalled(String),

    #[error("Capability context of extension '{0}' has been revoked")]
    ContextRevoked(String),

    #[error("Target file already exists: {0}")]
    TargetExists(PathBuf),

    #[error("Manifest not found in extension: {0}")]
    ManifestNotFound(PathBuf),

    #[error("Invalid manifest in {path}: {message}")]
    ManifestInvalid { path: PathBuf, message: String },

    #[error("Failed to load extension '{extension}': {message}")]
    LoadFailed { extension: String, message: String },

    #[error("Download failed: {0}")]
    Http(String),

    #[error("JavaScript error: {0}")]
    JavaScript(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ExtensionError {
    /// Wrap an IO error with a short description of what was attempted.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

impl From<std::io::Error> for ExtensionError {
    fn from(source: std::io::Error) -> Self {
        Self::io("IO error", source)
    }
}

/// Result type for extension operations.
pub type ExtensionResult<T> = Result<T, ExtensionError>;
