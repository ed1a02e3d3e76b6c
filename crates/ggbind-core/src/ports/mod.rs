//! Port definitions (trait abstractions) for the native adapter layer.
//!
//! Ports define the interface the domain expects from the native library.
//! They contain no FFI details and use only domain types.
//!
//! # Design Rules
//!
//! - No `libloading` or pointer types in any signature
//! - The raw buffer/sentinel calling convention of the native layer is
//!   preserved at this boundary and terminated by the marshaling layer in
//!   `ggbind-llama`; nothing above that layer sees it

pub mod adapter_backend;
pub mod error;

pub use adapter_backend::{AdapterBackend, NoopAdapterBackend, RawAdapterHandle, RawModelHandle};
pub use error::AdapterError;
