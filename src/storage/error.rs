//! Storage errors.

use thiserror::Error;

/// Errors raised by pet storage backends and the store controller.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Storage medium unreachable or malformed; fatal to construction.
    #[error("storage init failed: {0}")]
    Init(String),

    /// Patch cannot bridge from the recorded schema version.
    #[error("unsupported schema version {found} (running {current})")]
    UnsupportedSchema {
        /// Version found in config or storage
        found: String,
        /// Version this build runs
        current: String,
    },

    /// Rename target already exists for the owner.
    #[error("pet {pet} already exists for owner {owner}")]
    DuplicateIdentity {
        /// Owner name
        owner: String,
        /// Colliding pet name
        pet: String,
    },

    /// Owner or pet name rejected.
    #[error("invalid name: {0}")]
    InvalidName(String),

    /// Write failed.
    #[error("write failed: {0}")]
    Write(String),

    /// Read failed.
    #[error("read failed: {0}")]
    Read(String),

    /// Operation submitted to a store that is not ready.
    #[error("store is closed")]
    Closed,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Construct an init error.
    pub fn init(msg: impl Into<String>) -> Self {
        Self::Init(msg.into())
    }

    /// Construct a write error.
    pub fn write(msg: impl Into<String>) -> Self {
        Self::Write(msg.into())
    }

    /// Construct a read error.
    pub fn read(msg: impl Into<String>) -> Self {
        Self::Read(msg.into())
    }

    /// Whether this error aborts store construction.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Init(_) | Self::UnsupportedSchema { .. })
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// =============================================================================
// Tests
// =============================================================================
