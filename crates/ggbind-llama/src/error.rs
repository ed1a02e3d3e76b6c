//! Error types for opening the llama shared library.
//!
//! Adapter-level failures use `ggbind_core::AdapterError`; this module only
//! covers the library-open/symbol-resolution path, which happens once at
//! startup.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while opening the llama shared library and
/// resolving the adapter API symbols.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// The shared library could not be opened.
    #[error("failed to open llama shared library {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    /// A required symbol is missing from the library.
    #[error("llama shared library is missing symbol `{symbol}`: {source}")]
    MissingSymbol {
        symbol: &'static str,
        #[source]
        source: libloading::Error,
    },
}
