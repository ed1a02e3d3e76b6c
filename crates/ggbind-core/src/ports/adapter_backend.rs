//! Adapter backend port definition.
//!
//! This port abstracts the native llama.cpp adapter API so that different
//! implementations can sit behind it (the real dynamically-loaded library,
//! an in-memory fake for tests, a mock).
//!
//! The trait deliberately preserves the native calling convention for the
//! string accessors: the caller supplies a byte buffer, the implementation
//! writes a null-terminated string into it and returns the string length
//! (excluding the terminator), or `-1` on failure with the buffer cleared.
//! The marshaling layer in `ggbind-llama` is the only consumer of that
//! convention; everything above it sees typed results.

use std::num::NonZeroUsize;

use crate::domain::Token;

/// Opaque handle to a native model.
///
/// The value is the native pointer address; only the FFI layer converts it
/// back to a pointer. Keeping it opaque lets this crate stay free of unsafe
/// code while remaining faithful to the native identity semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawModelHandle(NonZeroUsize);

impl RawModelHandle {
    /// Wrap a non-null native address.
    #[must_use]
    pub const fn new(addr: NonZeroUsize) -> Self {
        Self(addr)
    }

    /// The native address.
    #[must_use]
    pub const fn addr(self) -> NonZeroUsize {
        self.0
    }
}

/// Opaque handle to a native adapter.
///
/// Same representation rules as [`RawModelHandle`]. An adapter's native
/// memory is transitively owned by its model; handles are only forwarded to
/// the native layer while the owning wrapper is in the loaded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawAdapterHandle(NonZeroUsize);

impl RawAdapterHandle {
    /// Wrap a non-null native address.
    #[must_use]
    pub const fn new(addr: NonZeroUsize) -> Self {
        Self(addr)
    }

    /// The native address.
    #[must_use]
    pub const fn addr(self) -> NonZeroUsize {
        self.0
    }
}

/// Port for the native adapter API slice.
///
/// # Port Signature Rules
///
/// - All types in signatures are from `ggbind-core`
/// - No pointer or library-loading types appear here
/// - Implementations live in `ggbind-llama`
pub trait AdapterBackend: Send + Sync {
    /// Load an adapter file for the given model.
    ///
    /// Returns `None` when the native load fails (null return). The path has
    /// already been validated as NUL-free by the caller.
    fn load_adapter(&self, model: RawModelHandle, path: &str) -> Option<RawAdapterHandle>;

    /// Native convention: writes the value for `key` null-terminated into
    /// `buf` and returns its length, or `-1` with `buf` cleared on failure
    /// (key absent, value not a scalar, or buffer too small).
    fn meta_value_by_key(&self, adapter: RawAdapterHandle, key: &str, buf: &mut [u8]) -> i32;

    /// Number of metadata key/value pairs. Non-negative.
    fn meta_count(&self, adapter: RawAdapterHandle) -> i32;

    /// Native convention as [`Self::meta_value_by_key`], keyed by index.
    fn meta_key_by_index(&self, adapter: RawAdapterHandle, index: i32, buf: &mut [u8]) -> i32;

    /// Native convention as [`Self::meta_value_by_key`], keyed by index.
    fn meta_value_by_index(&self, adapter: RawAdapterHandle, index: i32, buf: &mut [u8]) -> i32;

    /// Number of aLoRA invocation tokens; 0 for plain LoRA adapters.
    fn alora_invocation_token_count(&self, adapter: RawAdapterHandle) -> u64;

    /// The invocation tokens, exactly `alora_invocation_token_count` of
    /// them, copied out of the native array. Empty when the adapter is not
    /// an aLoRA variant.
    fn alora_invocation_tokens(&self, adapter: RawAdapterHandle) -> Vec<Token>;

    /// Release the adapter's native memory. Must be called at most once per
    /// handle; the wrapper layer guarantees this.
    fn free_adapter(&self, adapter: RawAdapterHandle);
}

/// A no-op backend that reports no metadata and fails every load.
///
/// Useful as a placeholder where a backend is required but never exercised.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAdapterBackend;

impl AdapterBackend for NoopAdapterBackend {
    fn load_adapter(&self, _model: RawModelHandle, _path: &str) -> Option<RawAdapterHandle> {
        None
    }

    fn meta_value_by_key(&self, _adapter: RawAdapterHandle, _key: &str, buf: &mut [u8]) -> i32 {
        buf.fill(0);
        -1
    }

    fn meta_count(&self, _adapter: RawAdapterHandle) -> i32 {
        0
    }

    fn meta_key_by_index(&self, _adapter: RawAdapterHandle, _index: i32, buf: &mut [u8]) -> i32 {
        buf.fill(0);
        -1
    }

    fn meta_value_by_index(&self, _adapter: RawAdapterHandle, _index: i32, buf: &mut [u8]) -> i32 {
        buf.fill(0);
        -1
    }

    fn alora_invocation_token_count(&self, _adapter: RawAdapterHandle) -> u64 {
        0
    }

    fn alora_invocation_tokens(&self, _adapter: RawAdapterHandle) -> Vec<Token> {
        Vec::new()
    }

    fn free_adapter(&self, _adapter: RawAdapterHandle) {}
}
