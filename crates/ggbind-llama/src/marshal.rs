//! Translation of the native buffer/sentinel string convention.
//!
//! The native accessors write a null-terminated string into a
//! caller-supplied buffer and return its length (excluding terminator), or
//! `-1` on failure with the buffer cleared. A `-1` is ambiguous between "no
//! such entry", "value is not a scalar" and "buffer too small", so reads go
//! through a probe/grow/retry loop before failure is concluded; callers
//! disambiguate a concluded failure against the key index.

use ggbind_core::AdapterError;

/// Initial probe buffer size; most metadata values are short.
pub(crate) const INITIAL_CAPACITY: usize = 256;

/// Upper bound for the grow-and-retry loop. GGUF string values can be large
/// (chat templates routinely reach tens of kilobytes).
pub(crate) const MAX_CAPACITY: usize = 1 << 20;

/// Outcome of a native string read after retries.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum MetaRead {
    /// The native layer produced a string.
    Value(String),
    /// The native layer still refused at `MAX_CAPACITY`.
    Failed,
}

/// Drive a native buffer call through the probe/grow/retry protocol.
///
/// `call` receives the buffer and returns the native result. Handles both
/// failure conventions seen in the wild: a plain `-1`, and the
/// snprintf-style "return the full length even though it did not fit".
pub(crate) fn read_native_string(
    mut call: impl FnMut(&mut [u8]) -> i32,
) -> Result<MetaRead, AdapterError> {
    let mut capacity = INITIAL_CAPACITY;
    loop {
        let mut buf = vec![0u8; capacity];
        let written = call(&mut buf);

        if written < 0 {
            if capacity >= MAX_CAPACITY {
                return Ok(MetaRead::Failed);
            }
            capacity = (capacity * 2).min(MAX_CAPACITY);
            continue;
        }

        #[allow(clippy::cast_sign_loss)]
        let len = written as usize;
        if len + 1 > buf.len() {
            // Truncated write; retry with an exact fit (plus terminator).
            if len + 1 > MAX_CAPACITY {
                return Ok(MetaRead::Failed);
            }
            capacity = len + 1;
            continue;
        }

        buf.truncate(len);
        return Ok(MetaRead::Value(String::from_utf8(buf)?));
    }
}
