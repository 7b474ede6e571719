/*!
Error types for the Rehydrate core engine.
*/

use rehydrate_retry::RetryableError;
use thiserror::Error;

/// Result type used throughout the Rehydrate core.
pub type Result<T> = std::result::Result<T, HydrateError>;

/// Errors that can occur while persisting or restoring state.
#[derive(Error, Debug)]
pub enum HydrateError {
    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Missing or invalid settings, such as an absent encryption key
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Malformed compressed, encoded or encrypted payloads
    #[error("Codec error: {0}")]
    Codec(String),

    /// Digest mismatch on load
    #[error("Integrity check failed: expected hash {expected}, got {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    /// Backend write failures
    #[error("Store write error: {0}")]
    StoreWrite(String),

    /// Backend read failures
    #[error("Store read error: {0}")]
    StoreRead(String),

    /// Operation invoked before the hydrator was initialized
    #[error("Hydrator has not been initialized")]
    NotInitialized,

    /// Missing named snapshot
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid record or envelope format
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// A persist cycle gave up after exhausting its retries
    #[error("Persist failed after {attempts} attempts: {source}")]
    PersistFailed {
        attempts: u32,
        #[source]
        source: Box<HydrateError>,
    },
}

impl HydrateError {
    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a new codec error
    pub fn codec<S: Into<String>>(msg: S) -> Self {
        Self::Codec(msg.into())
    }

    /// Create a new store write error
    pub fn store_write<S: Into<String>>(msg: S) -> Self {
        Self::StoreWrite(msg.into())
    }

    /// Create a new store read error
    pub fn store_read<S: Into<String>>(msg: S) -> Self {
        Self::StoreRead(msg.into())
    }

    /// Create a new not found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a new invalid format error
    pub fn invalid_format<S: Into<String>>(msg: S) -> Self {
        Self::InvalidFormat(msg.into())
    }
}

impl RetryableError for HydrateError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::StoreWrite(_) | Self::StoreRead(_)
        )
    }
}
