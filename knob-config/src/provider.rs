use std::collections::BTreeMap;

use knob::StdError;

use crate::KEY_DELIMITER;

/// A source of configuration key/value pairs.
///
/// Keys are full `:` delimited paths. Lookups are ASCII case-insensitive.
pub trait ConfigurationProvider: Send + Sync {
    /// Returns the value stored at the full path `key`.
    fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` at `key` until the next load.
    fn set(&mut self, key: &str, value: String);

    /// Re-reads the underlying source.
    fn load(&mut self) -> Result<(), StdError>;

    /// Returns the segments found directly below `parent`, or below the root when
    /// `parent` is empty.
    fn child_keys(&self, parent: &str) -> Vec<String>;
}

/// Case-insensitive key/value storage shared by the built-in providers.
#[derive(Default, Clone)]
pub struct KeyValueData {
    // Lowercase key -> (key as written, value).
    entries: BTreeMap<String, (String, String)>,
}

impl KeyValueData {
    /// Creates empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored at `key`, ignoring case.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(|(_, v)| v.as_str())
    }

    /// Stores `value` at `key`, replacing any value stored under another casing.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        self.entries
            .insert(key.to_ascii_lowercase(), (key, value.into()));
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks if no key is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the segment below `parent` of every key under it, in key order.
    ///
    /// A segment is repeated once per key below it.
    pub fn child_keys(&self, parent: &str) -> Vec<String> {
        let prefix = if parent.is_empty() {
            String::new()
        } else {
            format!("{}{KEY_DELIMITER}", parent.to_ascii_lowercase())
        };
        self.entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(_, (key, _))| key[prefix.len()..].split(KEY_DELIMITER).next())
            .map(str::to_string)
            .collect()
    }
}

/// In-memory provider.
///
/// # Examples
///
/// ```rust
/// use knob_config::{ConfigurationProvider, MemoryProvider};
///
/// let provider = MemoryProvider::new([("Server:Port", "8080")]);
/// assert_eq!(provider.get("server:port").as_deref(), Some("8080"));
/// ```
#[derive(Default, Clone)]
pub struct MemoryProvider {
    data: KeyValueData,
}

impl MemoryProvider {
    /// Creates a provider holding `pairs`.
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut data = KeyValueData::new();
        for (key, value) in pairs {
            data.insert(key, value);
        }
        Self { data }
    }

    /// Flattens a JSON document into `:` delimited keys.
    ///
    /// Array items are keyed by their index. `null` becomes an empty string.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let mut data = KeyValueData::new();
        flatten_json(&mut data, String::new(), value);
        Self { data }
    }
}

fn flatten_json(data: &mut KeyValueData, path: String, value: &serde_json::Value) {
    let child_path = |key: &str| {
        if path.is_empty() {
            key.to_string()
        } else {
            format!("{path}{KEY_DELIMITER}{key}")
        }
    };
    match value {
        serde_json::Value::Object(map) => {
            for (key, value) in map {
                flatten_json(data, child_path(key), value);
            }
        }
        serde_json::Value::Array(items) => {
            for (index, value) in items.iter().enumerate() {
                flatten_json(data, child_path(&index.to_string()), value);
            }
        }
        serde_json::Value::Null => data.insert(path, ""),
        serde_json::Value::String(v) => data.insert(path, v.as_str()),
        v => data.insert(path, v.to_string()),
    }
}

impl ConfigurationProvider for MemoryProvider {
    fn get(&self, key: &str) -> Option<String> {
        self.data.get(key).map(str::to_string)
    }

    fn set(&mut self, key: &str, value: String) {
        self.data.insert(key, value);
    }

    fn load(&mut self) -> Result<(), StdError> {
        Ok(())
    }

    fn child_keys(&self, parent: &str) -> Vec<String> {
        self.data.child_keys(parent)
    }
}

/// Provider reading process environment variables.
///
/// Only variables starting with the prefix (compared case-insensitively) are read,
/// with the prefix removed. A double underscore separates sections, so
/// `APP_SERVER__PORT` with prefix `APP_` becomes `SERVER:PORT`.
#[derive(Default, Clone)]
pub struct EnvironmentProvider {
    prefix: String,
    data: KeyValueData,
}

impl EnvironmentProvider {
    /// Creates a provider reading every environment variable.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provider reading variables starting with `prefix`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            data: KeyValueData::new(),
        }
    }
}

impl ConfigurationProvider for EnvironmentProvider {
    fn get(&self, key: &str) -> Option<String> {
        self.data.get(key).map(str::to_string)
    }

    fn set(&mut self, key: &str, value: String) {
        self.data.insert(key, value);
    }

    fn load(&mut self) -> Result<(), StdError> {
        self.data.clear();
        let prefix = self.prefix.to_ascii_lowercase();
        for (name, value) in std::env::vars_os() {
            let (Some(name), Some(value)) = (name.to_str(), value.to_str()) else {
                continue;
            };
            let Some(head) = name.get(..prefix.len()) else {
                continue;
            };
            if !head.eq_ignore_ascii_case(&prefix) {
                continue;
            }
            let key = name[prefix.len()..].replace("__", ":");
            if key.is_empty() {
                continue;
            }
            self.data.insert(key, value);
        }
        tracing::trace!(prefix = %self.prefix, count = self.data.len(), "Environment loaded");
        Ok(())
    }

    fn child_keys(&self, parent: &str) -> Vec<String> {
        self.data.child_keys(parent)
    }
}
