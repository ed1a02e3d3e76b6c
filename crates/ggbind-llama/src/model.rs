//! Non-owning model wrapper and adapter registry.
//!
//! A [`LlamaModelRef`] wraps a model handle that is owned elsewhere (the
//! inference side of the native library). It exists so adapters have an
//! authority for two things: the handle to load against, and the teardown
//! notification that invalidates every adapter it produced before the
//! native model memory goes away.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use ggbind_core::{AdapterBackend, AdapterError, RawModelHandle};
use tracing::{debug, warn};

use crate::adapter::{AdapterShared, LoraAdapter};

/// Shared model state; adapters hold a `Weak` to it for diagnostics only,
/// never an owning reference (adapters must not participate in the model's
/// destruction order).
pub(crate) struct ModelShared {
    raw: RawModelHandle,
    registry: Mutex<Registry>,
}

struct Registry {
    released: bool,
    adapters: Vec<Weak<AdapterShared>>,
}

/// Non-owning wrapper around a native model handle.
///
/// The caller guarantees the native model outlives this wrapper and that
/// the wrapper is released (explicitly or by drop) before the model is
/// destroyed natively.
pub struct LlamaModelRef {
    shared: Arc<ModelShared>,
    backend: Arc<dyn AdapterBackend>,
}

impl LlamaModelRef {
    /// Wrap an externally-owned model handle.
    #[must_use]
    pub fn from_raw(raw: RawModelHandle, backend: Arc<dyn AdapterBackend>) -> Self {
        Self {
            shared: Arc::new(ModelShared {
                raw,
                registry: Mutex::new(Registry {
                    released: false,
                    adapters: Vec::new(),
                }),
            }),
            backend,
        }
    }

    /// The wrapped native handle.
    #[must_use]
    pub fn raw(&self) -> RawModelHandle {
        self.shared.raw
    }

    /// Load a LoRA adapter file for this model.
    ///
    /// On success the adapter is registered with this model and will be
    /// invalidated by [`LlamaModelRef::release`].
    pub fn load_adapter(&self, path: impl AsRef<Path>) -> Result<LoraAdapter, AdapterError> {
        let path = path.as_ref();
        let Some(path_str) = path.to_str() else {
            return Err(AdapterError::InvalidPath {
                path: path.to_path_buf(),
            });
        };
        if path_str.contains('\0') {
            return Err(AdapterError::InvalidPath {
                path: path.to_path_buf(),
            });
        }

        // Holding the registry lock across the native load serializes it
        // against release(): an adapter can never be born into a model that
        // has already torn down.
        let mut registry = self.lock_registry();
        if registry.released {
            return Err(AdapterError::ModelReleased);
        }

        let raw_adapter = self
            .backend
            .load_adapter(self.shared.raw, path_str)
            .ok_or_else(|| AdapterError::LoadFailed {
                path: path.to_path_buf(),
            })?;

        let shared = Arc::new(AdapterShared::new(raw_adapter));
        registry.adapters.push(Arc::downgrade(&shared));
        debug!(path = %path.display(), "loaded LoRA adapter");

        Ok(LoraAdapter::new(
            shared,
            Arc::downgrade(&self.shared),
            Arc::clone(&self.backend),
            path.to_path_buf(),
        ))
    }

    /// Number of registered adapters still in the loaded state.
    #[must_use]
    pub fn adapter_count(&self) -> usize {
        self.lock_registry()
            .adapters
            .iter()
            .filter(|weak| weak.upgrade().is_some_and(|shared| shared.is_loaded()))
            .count()
    }

    /// Tear down: invalidate every registered adapter that is still loaded.
    ///
    /// The adapters' native memory is freed by the model's own native
    /// teardown, so no native free is issued here; the adapters simply stop
    /// forwarding calls. Idempotent. Returns how many adapters were
    /// invalidated.
    pub fn release(&self) -> usize {
        let mut registry = self.lock_registry();
        if registry.released {
            return 0;
        }
        registry.released = true;

        let mut invalidated = 0;
        for weak in registry.adapters.drain(..) {
            if let Some(shared) = weak.upgrade() {
                if shared.invalidate_for_model_release() {
                    invalidated += 1;
                }
            }
        }

        if invalidated > 0 {
            warn!(
                invalidated,
                "model released with adapters still loaded; they are now invalid"
            );
        } else {
            debug!("model released; no live adapters to invalidate");
        }
        invalidated
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.shared
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for LlamaModelRef {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;
    use std::path::PathBuf;

    use crate::fake::{FakeAdapterBackend, FakeAdapterFile};

    fn model_handle() -> RawModelHandle {
        RawModelHandle::new(NonZeroUsize::new(0x4000).unwrap())
    }

    fn backend_with_file(path: &str) -> Arc<FakeAdapterBackend> {
        let backend = FakeAdapterBackend::new();
        backend.register_file(path, FakeAdapterFile::new().with_entry("lora.rank", "8"));
        Arc::new(backend)
    }

    #[test]
    fn test_load_failure_is_typed() {
        let backend = Arc::new(FakeAdapterBackend::new());
        let model = LlamaModelRef::from_raw(model_handle(), backend);
        let err = model.load_adapter("missing.gguf").unwrap_err();
        assert!(matches!(
            err,
            AdapterError::LoadFailed { path } if path == PathBuf::from("missing.gguf")
        ));
    }

    #[test]
    fn test_path_with_interior_nul_is_rejected_locally() {
        let backend = Arc::new(FakeAdapterBackend::new());
        let model = LlamaModelRef::from_raw(model_handle(), backend);
        let err = model.load_adapter("bad\0path.gguf").unwrap_err();
        assert!(matches!(err, AdapterError::InvalidPath { .. }));
    }

    #[test]
    fn test_release_invalidates_loaded_adapters_without_freeing() {
        let backend = backend_with_file("adapter.gguf");
        let model = LlamaModelRef::from_raw(model_handle(), backend.clone());
        let adapter = model.load_adapter("adapter.gguf").unwrap();

        assert_eq!(model.adapter_count(), 1);
        assert_eq!(model.release(), 1);

        assert!(!adapter.is_loaded());
        assert!(matches!(
            adapter.meta_value("lora.rank"),
            Err(AdapterError::ModelReleased)
        ));
        assert!(matches!(adapter.unload(), Err(AdapterError::ModelReleased)));
        // The model's native teardown owns the memory; the wrapper must not
        // have issued a free.
        assert_eq!(backend.freed_count(), 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let backend = backend_with_file("adapter.gguf");
        let model = LlamaModelRef::from_raw(model_handle(), backend);
        let _adapter = model.load_adapter("adapter.gguf").unwrap();
        assert_eq!(model.release(), 1);
        assert_eq!(model.release(), 0);
    }

    #[test]
    fn test_load_after_release_fails_fast() {
        let backend = backend_with_file("adapter.gguf");
        let model = LlamaModelRef::from_raw(model_handle(), backend);
        model.release();
        assert!(matches!(
            model.load_adapter("adapter.gguf"),
            Err(AdapterError::ModelReleased)
        ));
    }

    #[test]
    fn test_explicitly_unloaded_adapters_are_not_counted_or_invalidated() {
        let backend = backend_with_file("adapter.gguf");
        let model = LlamaModelRef::from_raw(model_handle(), backend.clone());
        let adapter = model.load_adapter("adapter.gguf").unwrap();

        adapter.unload().unwrap();
        assert_eq!(model.adapter_count(), 0);
        assert_eq!(backend.freed_count(), 1);
        // Already-unloaded adapters are skipped at teardown.
        assert_eq!(model.release(), 0);
        // And their error keeps naming the explicit unload, not the model.
        assert!(matches!(adapter.unload(), Err(AdapterError::AlreadyUnloaded)));
    }

    #[test]
    fn test_drop_releases() {
        let backend = backend_with_file("adapter.gguf");
        let model = LlamaModelRef::from_raw(model_handle(), backend.clone());
        let adapter = model.load_adapter("adapter.gguf").unwrap();
        assert!(adapter.model_alive());

        drop(model);
        assert!(!adapter.model_alive());
        assert!(!adapter.is_loaded());
        assert!(matches!(
            adapter.meta_count(),
            Err(AdapterError::ModelReleased)
        ));
    }
}
