//! Error types for the model registry

use thiserror::Error;

/// Errors that can occur in the model registry
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No artifact with this version
    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    /// An immutable object already exists under this name
    #[error("Artifact already exists: {0}")]
    ArtifactExists(String),

    /// Stored payload does not hash to the recorded value
    #[error("Integrity check failed for {version}: expected {expected}, got {actual}")]
    Integrity {
        version: String,
        expected: String,
        actual: String,
    },

    /// Unrecognized stage name
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    /// Unrecognized model target
    #[error("Unknown model target: {0}")]
    UnknownTarget(String),

    /// Operation the configured backend cannot perform
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Invalid registry configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Every attempted backend write failed
    #[error("All backend writes failed: {}", .0.join("; "))]
    AllBackendsFailed(Vec<String>),

    /// Object store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
