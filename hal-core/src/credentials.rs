//! Credential oracle
//!
//! The core never interprets credentials; it asks this oracle by key
//! (GITHUB_TOKEN, ANTHROPIC_API_KEY, ...) and forwards the values into
//! the wrapper's scrubbed environment block. Process environment wins
//! over the persistent file store.

use std::collections::HashMap;
use std::path::Path;

/// Key/value credential lookup with env-over-file precedence
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    file_values: HashMap<String, String>,
}

impl Credentials {
    /// Load the persistent store at `path`; a missing or unreadable
    /// file yields an empty store (env lookups still work).
    pub fn load(path: &Path) -> Self {
        let file_values = std::fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self { file_values }
    }

    /// Load from the default location under the config dir
    pub fn load_default() -> Self {
        Self::load(&hal_paths::config_dir().join("credentials.json"))
    }

    /// Build from explicit values (tests)
    pub fn from_map(values: HashMap<String, String>) -> Self {
        Self {
            file_values: values,
        }
    }

    /// Resolve a credential. Environment first, then the file store.
    pub fn get(&self, key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| self.file_values.get(key).cloned())
    }

    /// Resolve several keys at once, skipping absent ones
    pub fn resolve(&self, keys: &[String]) -> Vec<(String, String)> {
        keys.iter()
            .filter_map(|key| self.get(key).map(|value| (key.clone(), value)))
            .collect()
    }
}
