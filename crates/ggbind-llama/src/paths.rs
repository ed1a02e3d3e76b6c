//! Shared-library location resolution.
//!
//! Resolution order: explicit caller path, then the `GGBIND_LLAMA_LIB`
//! environment variable, then the platform default library name (left to
//! the system loader's search path).

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Environment variable overriding the llama shared library location.
pub const LIB_ENV_VAR: &str = "GGBIND_LLAMA_LIB";

#[cfg(target_os = "windows")]
const DEFAULT_LIBRARY_NAME: &str = "llama.dll";

#[cfg(target_os = "macos")]
const DEFAULT_LIBRARY_NAME: &str = "libllama.dylib";

#[cfg(all(unix, not(target_os = "macos")))]
const DEFAULT_LIBRARY_NAME: &str = "libllama.so";

/// Resolve the llama shared library path.
#[must_use]
pub fn resolve_library_path(explicit: Option<&Path>) -> PathBuf {
    resolve_from(explicit, std::env::var_os(LIB_ENV_VAR))
}

fn resolve_from(explicit: Option<&Path>, env_override: Option<OsString>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(value) = env_override {
        if !value.is_empty() {
            return PathBuf::from(value);
        }
    }
    PathBuf::from(DEFAULT_LIBRARY_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_path_wins() {
        let path = resolve_from(
            Some(Path::new("/opt/llama/libllama.so")),
            Some(OsString::from("/elsewhere/libllama.so")),
        );
        assert_eq!(path, PathBuf::from("/opt/llama/libllama.so"));
    }

    #[test]
    fn test_env_override_beats_default() {
        let path = resolve_from(None, Some(OsString::from("/custom/libllama.so")));
        assert_eq!(path, PathBuf::from("/custom/libllama.so"));
    }

    #[test]
    fn test_empty_env_value_is_ignored() {
        let path = resolve_from(None, Some(OsString::new()));
        assert_eq!(path, PathBuf::from(DEFAULT_LIBRARY_NAME));
    }

    #[test]
    fn test_default_is_a_bare_library_name() {
        let path = resolve_from(None, None);
        assert_eq!(path.components().count(), 1);
        assert!(path.to_string_lossy().contains("llama"));
    }
}
