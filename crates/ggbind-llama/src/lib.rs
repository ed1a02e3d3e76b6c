//! Safe LoRA adapter bindings over the llama.cpp shared library.
//!
//! This crate wraps the adapter slice of the llama.cpp C API — adapter
//! loading/unloading, GGUF metadata introspection, and aLoRA invocation
//! tokens — behind a typed surface. The library is loaded dynamically; no
//! native code is built or linked at compile time.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::num::NonZeroUsize;
//!
//! use ggbind_core::RawModelHandle;
//! use ggbind_llama::Llama;
//!
//! # fn model_handle_from_inference_side() -> RawModelHandle {
//! #     RawModelHandle::new(NonZeroUsize::new(0x1000).unwrap())
//! # }
//! let llama = Llama::open_default()?;
//!
//! // The model itself is owned by the inference side of the library;
//! // this crate only needs its handle.
//! let model = llama.attach_model(model_handle_from_inference_side());
//!
//! let adapter = model.load_adapter("adapter.gguf")?;
//! println!("adapter: {:?}", adapter.name());
//! println!("rank: {}", adapter.meta_value("lora.rank")?);
//!
//! adapter.unload()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
#![deny(unused_crate_dependencies)]

use std::path::Path;
use std::sync::Arc;

use ggbind_core::{AdapterBackend, RawModelHandle};

mod adapter;
mod backend;
mod error;
pub mod fake;
mod ffi;
mod marshal;
mod model;
pub mod paths;

pub use adapter::LoraAdapter;
pub use backend::NativeBackend;
pub use error::LibraryError;
pub use model::LlamaModelRef;

// Re-export the core crate so downstream users get the domain types from
// one dependency line.
pub use ggbind_core;

// Silence unused dev-dependency warnings for crates used only in tests/
#[cfg(test)]
use tempfile as _;
#[cfg(test)]
use tracing_subscriber as _;

/// Entry point: the dynamically-loaded llama library.
///
/// Cheap to clone; all handles derived from it share one symbol table.
#[derive(Clone)]
pub struct Llama {
    backend: Arc<NativeBackend>,
}

impl Llama {
    /// Open the llama shared library resolved from the environment
    /// (`GGBIND_LLAMA_LIB`) or the platform default name.
    pub fn open_default() -> Result<Self, LibraryError> {
        Self::open(paths::resolve_library_path(None))
    }

    /// Open the llama shared library at an explicit path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LibraryError> {
        Ok(Self {
            backend: Arc::new(NativeBackend::open(path.as_ref())?),
        })
    }

    /// Wrap an externally-owned model handle for adapter management.
    #[must_use]
    pub fn attach_model(&self, raw: RawModelHandle) -> LlamaModelRef {
        let backend: Arc<dyn AdapterBackend> = self.backend.clone();
        LlamaModelRef::from_raw(raw, backend)
    }
}

impl std::fmt::Debug for Llama {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Llama").finish()
    }
}
