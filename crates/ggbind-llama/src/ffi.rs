//! Raw dynamic bindings to the llama.cpp adapter API.
//!
//! Thin unsafe layer over the shared library. Covers only the adapter
//! slice: load, GGUF metadata accessors, aLoRA invocation tokens, free.
//! The safe surface lives in `model` and `adapter`.
#![allow(unsafe_code)]
#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_int};
use std::num::NonZeroUsize;
use std::path::Path;

use ggbind_core::{RawAdapterHandle, RawModelHandle};
use libloading::Library;

use crate::error::LibraryError;

// Opaque native types
pub(crate) enum llama_model {}
pub(crate) enum llama_adapter_lora {}

pub(crate) type llama_token = i32;

type AdapterInitFn =
    unsafe extern "C" fn(*mut llama_model, *const c_char) -> *mut llama_adapter_lora;
type MetaValStrFn =
    unsafe extern "C" fn(*const llama_adapter_lora, *const c_char, *mut c_char, usize) -> c_int;
type MetaCountFn = unsafe extern "C" fn(*const llama_adapter_lora) -> c_int;
type MetaByIndexFn =
    unsafe extern "C" fn(*const llama_adapter_lora, c_int, *mut c_char, usize) -> c_int;
type AloraCountFn = unsafe extern "C" fn(*const llama_adapter_lora) -> u64;
type AloraTokensFn = unsafe extern "C" fn(*const llama_adapter_lora) -> *const llama_token;
type AdapterFreeFn = unsafe extern "C" fn(*mut llama_adapter_lora);

/// Resolved adapter API symbols.
///
/// The function pointers stay valid for as long as `_lib` keeps the shared
/// library mapped, which is for the lifetime of this struct.
pub(crate) struct LlamaApi {
    pub(crate) adapter_lora_init: AdapterInitFn,
    pub(crate) meta_val_str: MetaValStrFn,
    pub(crate) meta_count: MetaCountFn,
    pub(crate) meta_key_by_index: MetaByIndexFn,
    pub(crate) meta_val_str_by_index: MetaByIndexFn,
    pub(crate) alora_n_invocation_tokens: AloraCountFn,
    pub(crate) alora_invocation_tokens: AloraTokensFn,
    pub(crate) adapter_lora_free: AdapterFreeFn,
    _lib: Library,
}

impl LlamaApi {
    /// Open the shared library and resolve every adapter symbol up front,
    /// so missing symbols surface at startup rather than mid-call.
    pub(crate) fn open(path: &Path) -> Result<Self, LibraryError> {
        let lib = unsafe { Library::new(path) }.map_err(|source| LibraryError::Open {
            path: path.to_path_buf(),
            source,
        })?;

        // SAFETY: the symbol types match the llama.h declarations; the
        // library stays mapped because it is stored alongside the pointers.
        unsafe {
            Ok(Self {
                adapter_lora_init: sym(&lib, "llama_adapter_lora_init")?,
                meta_val_str: sym(&lib, "llama_adapter_meta_val_str")?,
                meta_count: sym(&lib, "llama_adapter_meta_count")?,
                meta_key_by_index: sym(&lib, "llama_adapter_meta_key_by_index")?,
                meta_val_str_by_index: sym(&lib, "llama_adapter_meta_val_str_by_index")?,
                alora_n_invocation_tokens: sym(&lib, "llama_adapter_get_alora_n_invocation_tokens")?,
                alora_invocation_tokens: sym(&lib, "llama_adapter_get_alora_invocation_tokens")?,
                adapter_lora_free: sym(&lib, "llama_adapter_lora_free")?,
                _lib: lib,
            })
        }
    }
}

/// Resolve one symbol and copy the function pointer out of the `Symbol`
/// guard. Sound because the owning `Library` outlives the copy.
unsafe fn sym<T: Copy>(lib: &Library, name: &'static str) -> Result<T, LibraryError> {
    let symbol = unsafe { lib.get::<T>(name.as_bytes()) }
        .map_err(|source| LibraryError::MissingSymbol { symbol: name, source })?;
    Ok(*symbol)
}

// =============================================================================
// Handle <-> pointer conversion
// =============================================================================
//
// The port layer carries native addresses as opaque non-zero integers so
// that `ggbind-core` needs no unsafe code. Only this module converts back.

pub(crate) fn model_ptr(handle: RawModelHandle) -> *mut llama_model {
    handle.addr().get() as *mut llama_model
}

pub(crate) fn adapter_ptr(handle: RawAdapterHandle) -> *mut llama_adapter_lora {
    handle.addr().get() as *mut llama_adapter_lora
}

pub(crate) fn adapter_handle(ptr: *mut llama_adapter_lora) -> Option<RawAdapterHandle> {
    NonZeroUsize::new(ptr as usize).map(RawAdapterHandle::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_pointer_has_no_handle() {
        assert!(adapter_handle(std::ptr::null_mut()).is_none());
    }

    #[test]
    fn test_handle_pointer_roundtrip() {
        let handle = adapter_handle(0x1000 as *mut llama_adapter_lora).unwrap();
        assert_eq!(adapter_ptr(handle) as usize, 0x1000);
    }
}
