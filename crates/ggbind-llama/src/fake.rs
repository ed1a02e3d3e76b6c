//! In-memory adapter backend for tests.
//!
//! [`FakeAdapterBackend`] reproduces the native calling conventions
//! faithfully: strings are written null-terminated, failures return `-1`
//! and clear the buffer, array-valued entries are never readable as
//! scalars. Like a mock, it panics on contract violations (a call with a
//! handle that was already freed, or a second free of the same handle) so
//! lifecycle bugs in the wrapper layer surface as test failures instead of
//! being absorbed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use ggbind_core::{AdapterBackend, RawAdapterHandle, RawModelHandle, Token};

/// A metadata value as stored in a fake adapter file.
#[derive(Debug, Clone)]
pub enum FakeValue {
    /// A scalar entry readable through the string accessors.
    Scalar(String),
    /// An array entry; the native accessors reject these.
    Array,
}

/// Blueprint for an adapter file the fake backend can "load".
///
/// Entry order is preserved and defines the metadata index order.
#[derive(Debug, Clone, Default)]
pub struct FakeAdapterFile {
    entries: Vec<(String, FakeValue)>,
    invocation_tokens: Vec<Token>,
}

impl FakeAdapterFile {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a scalar metadata entry.
    #[must_use]
    pub fn with_entry(mut self, key: &str, value: &str) -> Self {
        self.entries
            .push((key.to_string(), FakeValue::Scalar(value.to_string())));
        self
    }

    /// Append an array-valued metadata entry (counted, but unreadable).
    #[must_use]
    pub fn with_array_entry(mut self, key: &str) -> Self {
        self.entries.push((key.to_string(), FakeValue::Array));
        self
    }

    /// Mark the adapter as an aLoRA variant with the given invocation
    /// tokens.
    #[must_use]
    pub fn with_invocation_tokens(mut self, tokens: &[i32]) -> Self {
        self.invocation_tokens = tokens.iter().copied().map(Token::new).collect();
        self
    }

    fn find(&self, key: &str) -> Option<&FakeValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// In-memory [`AdapterBackend`] keyed by adapter file path.
#[derive(Default)]
pub struct FakeAdapterBackend {
    files: Mutex<HashMap<String, FakeAdapterFile>>,
    live: Mutex<HashMap<usize, FakeAdapterFile>>,
    freed: Mutex<Vec<usize>>,
    next_handle: AtomicUsize,
}

impl FakeAdapterBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_handle: AtomicUsize::new(0x1000),
            ..Self::default()
        }
    }

    /// Register a file so subsequent loads of `path` succeed.
    pub fn register_file(&self, path: &str, file: FakeAdapterFile) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), file);
    }

    /// How many adapters have been freed through the port.
    #[must_use]
    pub fn freed_count(&self) -> usize {
        self.freed.lock().unwrap().len()
    }

    /// How many adapters are currently live.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    fn with_live<T>(
        &self,
        adapter: RawAdapterHandle,
        op: impl FnOnce(&FakeAdapterFile) -> T,
    ) -> T {
        let live = self.live.lock().unwrap();
        let addr = adapter.addr().get();
        let file = live
            .get(&addr)
            .unwrap_or_else(|| panic!("backend called with released adapter handle {addr:#x}"));
        op(file)
    }
}

/// Write `value` into `buf` using the native convention.
fn write_str(value: &str, buf: &mut [u8]) -> i32 {
    let bytes = value.as_bytes();
    if bytes.len() + 1 > buf.len() {
        buf.fill(0);
        return -1;
    }
    buf[..bytes.len()].copy_from_slice(bytes);
    buf[bytes.len()] = 0;
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let len = bytes.len() as i32;
    len
}

fn fail(buf: &mut [u8]) -> i32 {
    buf.fill(0);
    -1
}

impl AdapterBackend for FakeAdapterBackend {
    fn load_adapter(&self, _model: RawModelHandle, path: &str) -> Option<RawAdapterHandle> {
        let file = self.files.lock().unwrap().get(path).cloned()?;
        let addr = self.next_handle.fetch_add(0x10, Ordering::Relaxed);
        self.live.lock().unwrap().insert(addr, file);
        std::num::NonZeroUsize::new(addr).map(RawAdapterHandle::new)
    }

    fn meta_value_by_key(&self, adapter: RawAdapterHandle, key: &str, buf: &mut [u8]) -> i32 {
        self.with_live(adapter, |file| match file.find(key) {
            Some(FakeValue::Scalar(value)) => write_str(value, buf),
            Some(FakeValue::Array) | None => fail(buf),
        })
    }

    fn meta_count(&self, adapter: RawAdapterHandle) -> i32 {
        self.with_live(adapter, |file| {
            #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
            let count = file.entries.len() as i32;
            count
        })
    }

    fn meta_key_by_index(&self, adapter: RawAdapterHandle, index: i32, buf: &mut [u8]) -> i32 {
        self.with_live(adapter, |file| {
            match usize::try_from(index).ok().and_then(|i| file.entries.get(i)) {
                Some((key, _)) => write_str(key, buf),
                None => fail(buf),
            }
        })
    }

    fn meta_value_by_index(&self, adapter: RawAdapterHandle, index: i32, buf: &mut [u8]) -> i32 {
        self.with_live(adapter, |file| {
            match usize::try_from(index).ok().and_then(|i| file.entries.get(i)) {
                Some((_, FakeValue::Scalar(value))) => write_str(value, buf),
                Some((_, FakeValue::Array)) | None => fail(buf),
            }
        })
    }

    fn alora_invocation_token_count(&self, adapter: RawAdapterHandle) -> u64 {
        self.with_live(adapter, |file| file.invocation_tokens.len() as u64)
    }

    fn alora_invocation_tokens(&self, adapter: RawAdapterHandle) -> Vec<Token> {
        self.with_live(adapter, |file| file.invocation_tokens.clone())
    }

    fn free_adapter(&self, adapter: RawAdapterHandle) {
        let addr = adapter.addr().get();
        let removed = self.live.lock().unwrap().remove(&addr);
        assert!(
            removed.is_some(),
            "double free of adapter handle {addr:#x}"
        );
        self.freed.lock().unwrap().push(addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;

    fn model() -> RawModelHandle {
        RawModelHandle::new(NonZeroUsize::new(0x4000).unwrap())
    }

    fn loaded_backend() -> (FakeAdapterBackend, RawAdapterHandle) {
        let backend = FakeAdapterBackend::new();
        backend.register_file(
            "adapter.gguf",
            FakeAdapterFile::new()
                .with_entry("lora.rank", "8")
                .with_array_entry("tokenizer.tokens"),
        );
        let adapter = backend.load_adapter(model(), "adapter.gguf").unwrap();
        (backend, adapter)
    }

    #[test]
    fn test_successful_read_is_null_terminated() {
        let (backend, adapter) = loaded_backend();
        let mut buf = vec![0xFF_u8; 16];
        let n = backend.meta_value_by_key(adapter, "lora.rank", &mut buf);
        assert_eq!(n, 1);
        assert_eq!(&buf[..2], b"8\0");
    }

    #[test]
    fn test_failed_read_clears_the_buffer() {
        let (backend, adapter) = loaded_backend();
        let mut buf = vec![0xFF_u8; 16];
        assert_eq!(backend.meta_value_by_key(adapter, "absent", &mut buf), -1);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_too_small_buffer_fails_like_native() {
        let (backend, adapter) = loaded_backend();
        // "8" needs two bytes with the terminator.
        let mut buf = vec![0xFF_u8; 1];
        assert_eq!(backend.meta_value_by_key(adapter, "lora.rank", &mut buf), -1);
        assert_eq!(buf[0], 0);
    }

    #[test]
    fn test_array_entries_are_counted_but_unreadable() {
        let (backend, adapter) = loaded_backend();
        assert_eq!(backend.meta_count(adapter), 2);
        let mut buf = vec![0u8; 64];
        assert_eq!(backend.meta_key_by_index(adapter, 1, &mut buf), 16);
        assert_eq!(
            backend.meta_value_by_key(adapter, "tokenizer.tokens", &mut buf),
            -1
        );
        assert_eq!(backend.meta_value_by_index(adapter, 1, &mut buf), -1);
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn test_double_free_panics() {
        let (backend, adapter) = loaded_backend();
        backend.free_adapter(adapter);
        backend.free_adapter(adapter);
    }

    #[test]
    #[should_panic(expected = "released adapter handle")]
    fn test_use_after_free_panics() {
        let (backend, adapter) = loaded_backend();
        backend.free_adapter(adapter);
        backend.meta_count(adapter);
    }
}
