//! Structured adapter metadata.
//!
//! An [`AdapterDescriptor`] is the domain-facing summary of an adapter's
//! GGUF metadata. The raw key/value pairs come from the binding layer; the
//! extraction logic here only interprets well-known keys.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Well-known metadata keys written by llama.cpp's adapter converter.
mod keys {
    pub const NAME: &str = "general.name";
    pub const ARCHITECTURE: &str = "general.architecture";
    pub const ADAPTER_TYPE: &str = "adapter.type";
    pub const LORA_ALPHA: &str = "adapter.lora.alpha";
}

/// Structured summary of an adapter's GGUF metadata.
///
/// All fields except `metadata` are extracted from well-known keys and are
/// `None` when the adapter file does not carry them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdapterDescriptor {
    /// Adapter name from `general.name`.
    pub name: Option<String>,
    /// Base model architecture the adapter targets (e.g. "llama").
    pub architecture: Option<String>,
    /// Adapter kind from `adapter.type` (e.g. "lora").
    pub adapter_type: Option<String>,
    /// LoRA scaling alpha from `adapter.lora.alpha`.
    pub alpha: Option<f32>,
    /// Number of aLoRA invocation tokens (0 for plain LoRA adapters).
    pub invocation_token_count: usize,
    /// All scalar key/value metadata pairs, as reported by the native layer.
    pub metadata: HashMap<String, String>,
}

impl AdapterDescriptor {
    /// Build a descriptor from enumerated scalar pairs and the
    /// invocation-token count.
    #[must_use]
    pub fn from_pairs(pairs: Vec<(String, String)>, invocation_token_count: usize) -> Self {
        let metadata: HashMap<String, String> = pairs.into_iter().collect();

        let name = metadata.get(keys::NAME).cloned();
        let architecture = metadata.get(keys::ARCHITECTURE).cloned();
        let adapter_type = metadata.get(keys::ADAPTER_TYPE).cloned();
        let alpha = metadata
            .get(keys::LORA_ALPHA)
            .and_then(|v| v.parse::<f32>().ok());

        Self {
            name,
            architecture,
            adapter_type,
            alpha,
            invocation_token_count,
            metadata,
        }
    }

    /// Whether the adapter is an activated-LoRA variant.
    #[must_use]
    pub const fn is_alora(&self) -> bool {
        self.invocation_token_count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(entries: &[(&str, &str)]) -> Vec<(String, String)> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_extracts_known_keys() {
        let descriptor = AdapterDescriptor::from_pairs(
            pairs(&[
                ("general.name", "my-adapter"),
                ("general.architecture", "llama"),
                ("adapter.type", "lora"),
                ("adapter.lora.alpha", "16"),
                ("lora.rank", "8"),
            ]),
            0,
        );

        assert_eq!(descriptor.name.as_deref(), Some("my-adapter"));
        assert_eq!(descriptor.architecture.as_deref(), Some("llama"));
        assert_eq!(descriptor.adapter_type.as_deref(), Some("lora"));
        assert!((descriptor.alpha.unwrap() - 16.0).abs() < f32::EPSILON);
        assert_eq!(descriptor.metadata.get("lora.rank").map(String::as_str), Some("8"));
        assert!(!descriptor.is_alora());
    }

    #[test]
    fn test_missing_keys_are_none() {
        let descriptor = AdapterDescriptor::from_pairs(pairs(&[("lora.rank", "8")]), 0);
        assert!(descriptor.name.is_none());
        assert!(descriptor.architecture.is_none());
        assert!(descriptor.adapter_type.is_none());
        assert!(descriptor.alpha.is_none());
    }

    #[test]
    fn test_unparseable_alpha_is_none() {
        let descriptor =
            AdapterDescriptor::from_pairs(pairs(&[("adapter.lora.alpha", "not-a-number")]), 0);
        assert!(descriptor.alpha.is_none());
    }

    #[test]
    fn test_alora_flag() {
        let descriptor = AdapterDescriptor::from_pairs(Vec::new(), 3);
        assert!(descriptor.is_alora());
        assert_eq!(descriptor.invocation_token_count, 3);
    }
}
