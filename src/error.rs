//! Error types for the stripe store

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the stripe store
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Erasure Coding Errors
    // =========================================================================
    /// A stripe lost more positions than the active code can correct
    #[error("Too many erased locations: {erased} erased, code corrects at most {correctable}")]
    TooManyErasedLocations { erased: usize, correctable: usize },

    /// Invalid EC configuration
    #[error("Invalid EC configuration: {0}")]
    InvalidEcConfig(String),

    /// EC encoding failed
    #[error("EC encoding failed: {0}")]
    EcEncodingFailed(String),

    // =========================================================================
    // Backend Errors
    // =========================================================================
    /// Connection loss or any other transport-level failure
    #[error("Backend transport error: {0}")]
    BackendTransport(String),

    /// A backend call exceeded its time budget
    #[error("Backend {operation} timed out after {timeout_ms}ms")]
    BackendTimeout { operation: String, timeout_ms: u64 },

    /// Container payload could not be decoded
    #[error("Corrupt container {index}: {reason}")]
    CorruptContainer { index: u64, reason: String },

    /// Block position outside of the interleave width
    #[error("Invalid block position {position} (total size {total_size})")]
    InvalidPosition { position: usize, total_size: usize },

    // =========================================================================
    // File Layer Errors
    // =========================================================================
    /// File metadata violates its own invariants
    #[error("Inconsistent metadata for {path}: {reason}")]
    MetadataInconsistent { path: String, reason: String },

    /// A write would grow a file past what its metadata can address
    #[error("Write to {path} at {offset} (+{len} bytes) exceeds the maximum file size")]
    FileTooLarge { path: String, offset: u64, len: usize },

    // =========================================================================
    // Ambient Errors
    // =========================================================================
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when a stripe could not be reconstructed.
    pub fn is_unrecoverable_stripe(&self) -> bool {
        matches!(self, Error::TooManyErasedLocations { .. })
    }

    /// True for failures that a degraded read may treat as a missing block.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::BackendTransport(_) | Error::BackendTimeout { .. } | Error::Io(_)
        )
    }
}
