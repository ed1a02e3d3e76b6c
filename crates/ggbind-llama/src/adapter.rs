//! The LoRA adapter ownership wrapper.
//!
//! A [`LoraAdapter`] owns the right to release one native adapter handle
//! and mediates every metadata query against it. The handle is forwarded to
//! the native layer only while the adapter is in the loaded state; the
//! state transition out of loaded happens exactly once, under the same lock
//! that guards the native calls, so a stale handle can never be freed or
//! dereferenced twice.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use ggbind_core::{AdapterBackend, AdapterDescriptor, AdapterError, RawAdapterHandle, Token};
use tracing::debug;

use crate::marshal::{self, MetaRead};
use crate::model::ModelShared;

/// Why an adapter left the loaded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReleaseReason {
    /// `unload()` was called and the native free was issued.
    Unloaded,
    /// The owning model was released; its teardown frees the adapter
    /// memory, so no native free is issued by the wrapper.
    ModelReleased,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum AdapterState {
    Loaded(RawAdapterHandle),
    Released(ReleaseReason),
}

/// State cell shared between an adapter and its model's registry, so model
/// teardown can invalidate the adapter without owning it.
pub(crate) struct AdapterShared {
    state: Mutex<AdapterState>,
}

impl AdapterShared {
    pub(crate) fn new(raw: RawAdapterHandle) -> Self {
        Self {
            state: Mutex::new(AdapterState::Loaded(raw)),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, AdapterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_loaded(&self) -> bool {
        matches!(*self.lock(), AdapterState::Loaded(_))
    }

    /// Flip a still-loaded adapter to the model-released state. Returns
    /// whether the adapter was loaded (and is now invalidated).
    pub(crate) fn invalidate_for_model_release(&self) -> bool {
        let mut state = self.lock();
        match *state {
            AdapterState::Loaded(_) => {
                *state = AdapterState::Released(ReleaseReason::ModelReleased);
                true
            }
            AdapterState::Released(_) => false,
        }
    }
}

/// A LoRA adapter loaded for a specific model.
///
/// Created by [`crate::LlamaModelRef::load_adapter`]. The adapter's native
/// memory is transitively owned by the model: dropping this wrapper does
/// NOT free it (the model's own teardown does); call [`LoraAdapter::unload`]
/// to release it early.
pub struct LoraAdapter {
    shared: Arc<AdapterShared>,
    model: Weak<ModelShared>,
    backend: Arc<dyn AdapterBackend>,
    path: PathBuf,
}

fn clamp_count(raw: i32) -> usize {
    usize::try_from(raw).unwrap_or(0)
}

impl LoraAdapter {
    pub(crate) fn new(
        shared: Arc<AdapterShared>,
        model: Weak<ModelShared>,
        backend: Arc<dyn AdapterBackend>,
        path: PathBuf,
    ) -> Self {
        Self {
            shared,
            model,
            backend,
            path,
        }
    }

    /// The path this adapter was loaded from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the adapter is still loaded (not unloaded, model not
    /// released).
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.shared.is_loaded()
    }

    /// Whether the owning model wrapper still exists.
    #[must_use]
    pub fn model_alive(&self) -> bool {
        self.model.upgrade().is_some()
    }

    /// Release the adapter's native memory.
    ///
    /// Exactly-once: the first call issues the native free; any further
    /// call, or a call after the owning model was released, fails fast
    /// without reaching the native layer.
    pub fn unload(&self) -> Result<(), AdapterError> {
        let mut state = self.shared.lock();
        match *state {
            AdapterState::Loaded(raw) => {
                self.backend.free_adapter(raw);
                *state = AdapterState::Released(ReleaseReason::Unloaded);
                debug!(path = %self.path.display(), "unloaded LoRA adapter");
                Ok(())
            }
            AdapterState::Released(ReleaseReason::Unloaded) => Err(AdapterError::AlreadyUnloaded),
            AdapterState::Released(ReleaseReason::ModelReleased) => Err(AdapterError::ModelReleased),
        }
    }

    /// Get a metadata value by key.
    ///
    /// A missing key yields [`AdapterError::MetadataNotFound`]; a key whose
    /// value is not a readable scalar (GGUF arrays) yields
    /// [`AdapterError::UnsupportedValue`].
    pub fn meta_value(&self, key: &str) -> Result<String, AdapterError> {
        if key.contains('\0') {
            return Err(AdapterError::InvalidKey);
        }
        self.with_loaded(|raw| {
            match marshal::read_native_string(|buf| self.backend.meta_value_by_key(raw, key, buf))? {
                MetaRead::Value(value) => Ok(value),
                MetaRead::Failed => Err(self.classify_value_failure(raw, key)),
            }
        })
    }

    /// Number of metadata key/value pairs.
    pub fn meta_count(&self) -> Result<usize, AdapterError> {
        self.with_loaded(|raw| Ok(clamp_count(self.backend.meta_count(raw))))
    }

    /// Get a metadata key name by index (`0 <= index < meta_count`).
    pub fn meta_key(&self, index: usize) -> Result<String, AdapterError> {
        self.with_loaded(|raw| {
            let idx = self.checked_index(raw, index)?;
            match marshal::read_native_string(|buf| self.backend.meta_key_by_index(raw, idx, buf))? {
                MetaRead::Value(key) => Ok(key),
                // Keys are always scalar strings; a refusal after the bounds
                // check means the native layer rejected the index.
                MetaRead::Failed => Err(AdapterError::IndexOutOfRange {
                    index,
                    count: clamp_count(self.backend.meta_count(raw)),
                }),
            }
        })
    }

    /// Get a metadata value by index (`0 <= index < meta_count`).
    pub fn meta_value_by_index(&self, index: usize) -> Result<String, AdapterError> {
        self.with_loaded(|raw| {
            let idx = self.checked_index(raw, index)?;
            match marshal::read_native_string(|buf| {
                self.backend.meta_value_by_index(raw, idx, buf)
            })? {
                MetaRead::Value(value) => Ok(value),
                MetaRead::Failed => {
                    // The index is in range, so the value itself is
                    // unreadable; name it by its key where possible.
                    let key = marshal::read_native_string(|buf| {
                        self.backend.meta_key_by_index(raw, idx, buf)
                    })
                    .ok()
                    .and_then(|read| match read {
                        MetaRead::Value(key) => Some(key),
                        MetaRead::Failed => None,
                    })
                    .unwrap_or_else(|| format!("#{index}"));
                    Err(AdapterError::UnsupportedValue { key })
                }
            }
        })
    }

    /// Enumerate all scalar metadata pairs in index order.
    ///
    /// Entries whose value is not a readable scalar (GGUF arrays) are
    /// skipped.
    pub fn meta_pairs(&self) -> Result<Vec<(String, String)>, AdapterError> {
        self.with_loaded(|raw| {
            let count = clamp_count(self.backend.meta_count(raw));
            let mut pairs = Vec::with_capacity(count);
            for index in 0..count {
                let Ok(idx) = i32::try_from(index) else { break };
                let key = match marshal::read_native_string(|buf| {
                    self.backend.meta_key_by_index(raw, idx, buf)
                })? {
                    MetaRead::Value(key) => key,
                    MetaRead::Failed => {
                        debug!(index, "skipping metadata entry with unreadable key");
                        continue;
                    }
                };
                match marshal::read_native_string(|buf| {
                    self.backend.meta_value_by_index(raw, idx, buf)
                })? {
                    MetaRead::Value(value) => pairs.push((key, value)),
                    MetaRead::Failed => {
                        debug!(key, "skipping non-scalar metadata entry");
                    }
                }
            }
            Ok(pairs)
        })
    }

    /// Number of aLoRA invocation tokens; 0 for plain LoRA adapters.
    pub fn invocation_token_count(&self) -> Result<usize, AdapterError> {
        self.with_loaded(|raw| {
            #[allow(clippy::cast_possible_truncation)]
            let count = self.backend.alora_invocation_token_count(raw) as usize;
            Ok(count)
        })
    }

    /// The aLoRA invocation tokens, copied out of the native array while
    /// the adapter is guaranteed loaded. Empty for plain LoRA adapters.
    pub fn invocation_tokens(&self) -> Result<Vec<Token>, AdapterError> {
        self.with_loaded(|raw| Ok(self.backend.alora_invocation_tokens(raw)))
    }

    /// Convenience reader for the `general.name` metadata key.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.meta_value("general.name").ok()
    }

    /// Build a structured summary of the adapter's metadata.
    pub fn describe(&self) -> Result<AdapterDescriptor, AdapterError> {
        let pairs = self.meta_pairs()?;
        let invocation_token_count = self.invocation_token_count()?;
        Ok(AdapterDescriptor::from_pairs(pairs, invocation_token_count))
    }

    /// Run `op` with the raw handle while holding the state lock, or fail
    /// fast when the adapter has left the loaded state.
    fn with_loaded<T>(
        &self,
        op: impl FnOnce(RawAdapterHandle) -> Result<T, AdapterError>,
    ) -> Result<T, AdapterError> {
        let state = self.shared.lock();
        match *state {
            AdapterState::Loaded(raw) => op(raw),
            AdapterState::Released(ReleaseReason::Unloaded) => Err(AdapterError::AlreadyUnloaded),
            AdapterState::Released(ReleaseReason::ModelReleased) => Err(AdapterError::ModelReleased),
        }
    }

    /// Bounds-check `index` against the live count and convert it for the
    /// native layer.
    fn checked_index(&self, raw: RawAdapterHandle, index: usize) -> Result<i32, AdapterError> {
        let count = clamp_count(self.backend.meta_count(raw));
        if index >= count {
            return Err(AdapterError::IndexOutOfRange { index, count });
        }
        i32::try_from(index).map_err(|_| AdapterError::IndexOutOfRange { index, count })
    }

    /// A value read concluded in failure: decide between "absent" and
    /// "present but unreadable" by consulting the key index.
    fn classify_value_failure(&self, raw: RawAdapterHandle, key: &str) -> AdapterError {
        let count = clamp_count(self.backend.meta_count(raw));
        for index in 0..count {
            let Ok(idx) = i32::try_from(index) else { break };
            if let Ok(MetaRead::Value(candidate)) =
                marshal::read_native_string(|buf| self.backend.meta_key_by_index(raw, idx, buf))
            {
                if candidate == key {
                    return AdapterError::UnsupportedValue {
                        key: key.to_string(),
                    };
                }
            }
        }
        AdapterError::MetadataNotFound {
            key: key.to_string(),
        }
    }
}

impl fmt::Debug for LoraAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoraAdapter")
            .field("path", &self.path)
            .field("loaded", &self.is_loaded())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;

    use ggbind_core::RawModelHandle;
    use mockall::mock;

    mock! {
        Backend {}

        impl AdapterBackend for Backend {
            fn load_adapter(&self, model: RawModelHandle, path: &str) -> Option<RawAdapterHandle>;
            fn meta_value_by_key(&self, adapter: RawAdapterHandle, key: &str, buf: &mut [u8]) -> i32;
            fn meta_count(&self, adapter: RawAdapterHandle) -> i32;
            fn meta_key_by_index(&self, adapter: RawAdapterHandle, index: i32, buf: &mut [u8]) -> i32;
            fn meta_value_by_index(&self, adapter: RawAdapterHandle, index: i32, buf: &mut [u8]) -> i32;
            fn alora_invocation_token_count(&self, adapter: RawAdapterHandle) -> u64;
            fn alora_invocation_tokens(&self, adapter: RawAdapterHandle) -> Vec<Token>;
            fn free_adapter(&self, adapter: RawAdapterHandle);
        }
    }

    fn raw_handle() -> RawAdapterHandle {
        RawAdapterHandle::new(NonZeroUsize::new(0x1000).unwrap())
    }

    fn adapter_with(backend: MockBackend) -> LoraAdapter {
        LoraAdapter::new(
            Arc::new(AdapterShared::new(raw_handle())),
            Weak::new(),
            Arc::new(backend),
            PathBuf::from("adapter.gguf"),
        )
    }

    fn write_native(value: &str, buf: &mut [u8]) -> i32 {
        let bytes = value.as_bytes();
        if bytes.len() + 1 > buf.len() {
            buf.fill(0);
            return -1;
        }
        buf[..bytes.len()].copy_from_slice(bytes);
        buf[bytes.len()] = 0;
        i32::try_from(bytes.len()).unwrap()
    }

    #[test]
    fn test_unload_frees_exactly_once() {
        let mut backend = MockBackend::new();
        backend.expect_free_adapter().times(1).return_const(());
        let adapter = adapter_with(backend);

        assert!(adapter.unload().is_ok());
        assert!(matches!(
            adapter.unload(),
            Err(AdapterError::AlreadyUnloaded)
        ));
        // A third call stays rejected too.
        assert!(matches!(
            adapter.unload(),
            Err(AdapterError::AlreadyUnloaded)
        ));
    }

    #[test]
    fn test_accessors_after_unload_never_reach_the_backend() {
        let mut backend = MockBackend::new();
        backend.expect_free_adapter().times(1).return_const(());
        // No other expectations: any metadata call after unload would panic
        // the mock.
        let adapter = adapter_with(backend);
        adapter.unload().unwrap();

        assert!(matches!(
            adapter.meta_value("general.name"),
            Err(AdapterError::AlreadyUnloaded)
        ));
        assert!(matches!(
            adapter.meta_count(),
            Err(AdapterError::AlreadyUnloaded)
        ));
        assert!(matches!(
            adapter.invocation_tokens(),
            Err(AdapterError::AlreadyUnloaded)
        ));
        assert!(!adapter.is_loaded());
    }

    #[test]
    fn test_model_release_invalidation_does_not_free() {
        let mut backend = MockBackend::new();
        backend.expect_free_adapter().times(0);
        let adapter = adapter_with(backend);

        assert!(adapter.shared.invalidate_for_model_release());
        assert!(matches!(
            adapter.meta_value("general.name"),
            Err(AdapterError::ModelReleased)
        ));
        assert!(matches!(adapter.unload(), Err(AdapterError::ModelReleased)));
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let mut backend = MockBackend::new();
        backend.expect_meta_value_by_key().returning(|_, _, buf| {
            buf.fill(0);
            -1
        });
        backend.expect_meta_count().return_const(0_i32);
        let adapter = adapter_with(backend);

        assert!(matches!(
            adapter.meta_value("nope"),
            Err(AdapterError::MetadataNotFound { key }) if key == "nope"
        ));
    }

    #[test]
    fn test_present_but_unreadable_key_is_unsupported() {
        let mut backend = MockBackend::new();
        backend.expect_meta_value_by_key().returning(|_, _, buf| {
            buf.fill(0);
            -1
        });
        backend.expect_meta_count().return_const(1_i32);
        backend
            .expect_meta_key_by_index()
            .returning(|_, _, buf| write_native("tokenizer.tokens", buf));
        let adapter = adapter_with(backend);

        assert!(matches!(
            adapter.meta_value("tokenizer.tokens"),
            Err(AdapterError::UnsupportedValue { key }) if key == "tokenizer.tokens"
        ));
    }

    #[test]
    fn test_key_with_interior_nul_is_rejected_locally() {
        // No expectations at all: the key never reaches the backend.
        let adapter = adapter_with(MockBackend::new());
        assert!(matches!(
            adapter.meta_value("bad\0key"),
            Err(AdapterError::InvalidKey)
        ));
    }

    #[test]
    fn test_index_out_of_range_is_checked_locally() {
        let mut backend = MockBackend::new();
        backend.expect_meta_count().return_const(2_i32);
        // meta_key_by_index is never expected for the out-of-range index.
        let adapter = adapter_with(backend);

        assert!(matches!(
            adapter.meta_key(5),
            Err(AdapterError::IndexOutOfRange { index: 5, count: 2 })
        ));
    }

    #[test]
    fn test_negative_native_count_clamps_to_zero() {
        let mut backend = MockBackend::new();
        backend.expect_meta_count().return_const(-3_i32);
        let adapter = adapter_with(backend);
        assert_eq!(adapter.meta_count().unwrap(), 0);
    }

    #[test]
    fn test_debug_does_not_expose_the_raw_handle() {
        let rendered = format!("{:?}", adapter_with(MockBackend::new()));
        assert!(rendered.contains("adapter.gguf"));
        assert!(!rendered.contains("1000"), "raw address must not leak: {rendered}");
    }
}
