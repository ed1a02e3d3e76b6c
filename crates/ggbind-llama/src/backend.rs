//! Native implementation of the adapter backend port.
//!
//! Forwards port calls to the dynamically-loaded symbol table in `ffi`.
//! Together with `ffi`, this is the only module containing unsafe code.
#![allow(unsafe_code)]

use std::ffi::CString;
use std::path::Path;

use ggbind_core::{AdapterBackend, RawAdapterHandle, RawModelHandle, Token};

use crate::error::LibraryError;
use crate::ffi::{self, LlamaApi};

/// Adapter backend over the real llama shared library.
pub struct NativeBackend {
    api: LlamaApi,
}

impl NativeBackend {
    /// Open the shared library at `path` and resolve the adapter API.
    pub fn open(path: &Path) -> Result<Self, LibraryError> {
        Ok(Self {
            api: LlamaApi::open(path)?,
        })
    }
}

impl AdapterBackend for NativeBackend {
    fn load_adapter(&self, model: RawModelHandle, path: &str) -> Option<RawAdapterHandle> {
        let c_path = CString::new(path).ok()?;
        // SAFETY: the model handle originates from a live native model and
        // the path is a valid NUL-terminated C string.
        let ptr = unsafe { (self.api.adapter_lora_init)(ffi::model_ptr(model), c_path.as_ptr()) };
        ffi::adapter_handle(ptr)
    }

    fn meta_value_by_key(&self, adapter: RawAdapterHandle, key: &str, buf: &mut [u8]) -> i32 {
        let Ok(c_key) = CString::new(key) else {
            buf.fill(0);
            return -1;
        };
        if buf.is_empty() {
            return -1;
        }
        // SAFETY: the handle is forwarded only while the adapter is loaded;
        // the native call writes at most `buf.len()` bytes.
        unsafe {
            (self.api.meta_val_str)(
                ffi::adapter_ptr(adapter),
                c_key.as_ptr(),
                buf.as_mut_ptr().cast::<std::ffi::c_char>(),
                buf.len(),
            )
        }
    }

    fn meta_count(&self, adapter: RawAdapterHandle) -> i32 {
        // SAFETY: read-only query on a loaded adapter.
        unsafe { (self.api.meta_count)(ffi::adapter_ptr(adapter)) }
    }

    fn meta_key_by_index(&self, adapter: RawAdapterHandle, index: i32, buf: &mut [u8]) -> i32 {
        if buf.is_empty() {
            return -1;
        }
        // SAFETY: as `meta_value_by_key`.
        unsafe {
            (self.api.meta_key_by_index)(
                ffi::adapter_ptr(adapter),
                index,
                buf.as_mut_ptr().cast::<std::ffi::c_char>(),
                buf.len(),
            )
        }
    }

    fn meta_value_by_index(&self, adapter: RawAdapterHandle, index: i32, buf: &mut [u8]) -> i32 {
        if buf.is_empty() {
            return -1;
        }
        // SAFETY: as `meta_value_by_key`.
        unsafe {
            (self.api.meta_val_str_by_index)(
                ffi::adapter_ptr(adapter),
                index,
                buf.as_mut_ptr().cast::<std::ffi::c_char>(),
                buf.len(),
            )
        }
    }

    fn alora_invocation_token_count(&self, adapter: RawAdapterHandle) -> u64 {
        // SAFETY: read-only query on a loaded adapter.
        unsafe { (self.api.alora_n_invocation_tokens)(ffi::adapter_ptr(adapter)) }
    }

    fn alora_invocation_tokens(&self, adapter: RawAdapterHandle) -> Vec<Token> {
        let count = usize::try_from(self.alora_invocation_token_count(adapter)).unwrap_or(0);
        if count == 0 {
            return Vec::new();
        }
        // SAFETY: read-only query on a loaded adapter.
        let ptr = unsafe { (self.api.alora_invocation_tokens)(ffi::adapter_ptr(adapter)) };
        if ptr.is_null() {
            return Vec::new();
        }
        // SAFETY: the native layer guarantees the array holds exactly
        // `count` tokens; they are copied out before the lock on the
        // adapter state is released.
        let raw = unsafe { std::slice::from_raw_parts(ptr, count) };
        raw.iter().copied().map(Token::new).collect()
    }

    fn free_adapter(&self, adapter: RawAdapterHandle) {
        // SAFETY: the wrapper layer issues at most one free per handle.
        unsafe { (self.api.adapter_lora_free)(ffi::adapter_ptr(adapter)) }
    }
}
