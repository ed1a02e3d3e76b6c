//! Domain-facing error type for adapter operations.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading an adapter or querying its metadata.
///
/// Native failure codes never escape the binding layer; every failure mode
/// is translated into one of these variants.
#[derive(Debug, Error)]
pub enum AdapterError {
    // === Lookup ===
    /// The requested metadata key has no entry.
    #[error("adapter metadata key not found: {key}")]
    MetadataNotFound { key: String },

    /// The requested metadata index is outside `0..count`.
    #[error("adapter metadata index {index} out of range (count {count})")]
    IndexOutOfRange { index: usize, count: usize },

    /// The entry exists but its value cannot be read as a scalar string
    /// (array-valued GGUF entries are not readable through this API).
    #[error("adapter metadata value for '{key}' has an unsupported kind")]
    UnsupportedValue { key: String },

    // === Marshaling ===
    /// The native layer returned bytes that are not valid UTF-8.
    #[error("adapter metadata string is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// The caller-supplied key contains an interior NUL byte.
    #[error("metadata key contains an interior NUL byte")]
    InvalidKey,

    /// The adapter path is not representable as a C string.
    #[error("adapter path is not representable for the native layer: {path}")]
    InvalidPath { path: PathBuf },

    // === Lifecycle ===
    /// The adapter was already unloaded; the native layer was not reached.
    #[error("adapter was already unloaded")]
    AlreadyUnloaded,

    /// The owning model was released, invalidating this adapter.
    #[error("owning model was released; adapter is no longer valid")]
    ModelReleased,

    /// The native library failed to load the adapter file.
    #[error("failed to load adapter from {path}")]
    LoadFailed { path: PathBuf },
}
