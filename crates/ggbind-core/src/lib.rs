//! Core domain types and port definitions for ggbind.
//!
//! This crate contains no FFI and no unsafe code. It defines the domain
//! vocabulary (tokens, adapter descriptors, raw handle newtypes), the
//! [`AdapterBackend`] port that abstracts the native llama.cpp adapter API,
//! and the domain-facing error taxonomy. The binding implementation lives in
//! `ggbind-llama`.
#![deny(unused_crate_dependencies)]

pub mod domain;
pub mod ports;

// Re-export commonly used types for convenience
pub use domain::{AdapterDescriptor, Token};
pub use ports::{
    AdapterBackend, AdapterError, NoopAdapterBackend, RawAdapterHandle, RawModelHandle,
};
