use std::cmp::Ordering;
use std::mem::take;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use knob::{ChangeToken, ChangeTrigger};

use crate::{ConfigError, ConfigurationProvider, EnvironmentProvider, MemoryProvider};

/// Delimiter between the segments of a configuration path.
pub const KEY_DELIMITER: char = ':';

/// Hierarchical configuration backed by an ordered list of providers.
///
/// Later providers override earlier ones. The handle is cheap to clone and every
/// clone observes the same providers and reload token.
///
/// # Examples
///
/// ```rust
/// use knob_config::Configuration;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Configuration::builder()
///     .add_pairs([("Server:Host", "localhost"), ("Server:Port", "80")])
///     .add_pairs([("Server:Port", "8080")])
///     .build()?;
///
/// let server = config.section("Server");
/// assert_eq!(server.get("port").as_deref(), Some("8080"));
/// assert_eq!(server.children().len(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Configuration {
    inner: Arc<ConfigurationInner>,
}

struct ConfigurationInner {
    providers: RwLock<Vec<Box<dyn ConfigurationProvider>>>,
    trigger: Mutex<ChangeTrigger>,
}

/// Non-owning handle to a [`Configuration`].
#[derive(Clone)]
pub struct WeakConfiguration {
    inner: Weak<ConfigurationInner>,
}

impl WeakConfiguration {
    /// Returns the configuration if it is still alive.
    pub fn upgrade(&self) -> Option<Configuration> {
        self.inner.upgrade().map(|inner| Configuration { inner })
    }
}

/// Builder of a [`Configuration`] with several providers.
#[derive(Default)]
pub struct ConfigurationBuilder {
    providers: Vec<Box<dyn ConfigurationProvider>>,
}

impl ConfigurationBuilder {
    /// Appends a provider. Providers added later override earlier ones.
    pub fn add_provider<P>(mut self, provider: P) -> Self
    where
        P: ConfigurationProvider + 'static,
    {
        self.providers.push(Box::new(provider));
        self
    }

    /// Appends an in-memory provider holding `pairs`.
    pub fn add_pairs<I, K, V>(self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.add_provider(MemoryProvider::new(pairs))
    }

    /// Appends an in-memory provider flattened from a JSON document.
    pub fn add_json(self, value: &serde_json::Value) -> Self {
        self.add_provider(MemoryProvider::from_json(value))
    }

    /// Appends an environment provider reading variables starting with `prefix`.
    pub fn add_environment(self, prefix: impl Into<String>) -> Self {
        self.add_provider(EnvironmentProvider::with_prefix(prefix))
    }

    /// Loads every provider.
    pub fn build(mut self) -> Result<Configuration, ConfigError> {
        for provider in &mut self.providers {
            provider.load().map_err(ConfigError::Provider)?;
        }
        Ok(Configuration {
            inner: Arc::new(ConfigurationInner {
                providers: RwLock::new(self.providers),
                trigger: Mutex::new(ChangeTrigger::new()),
            }),
        })
    }
}

impl Configuration {
    /// Creates a builder for a configuration with several providers.
    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    /// Builds a configuration from a single in-memory provider.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let provider: Box<dyn ConfigurationProvider> = Box::new(MemoryProvider::new(pairs));
        Self {
            inner: Arc::new(ConfigurationInner {
                providers: RwLock::new(vec![provider]),
                trigger: Mutex::new(ChangeTrigger::new()),
            }),
        }
    }

    /// Returns the value at `key` from the last provider that has it.
    pub fn get(&self, key: &str) -> Option<String> {
        self.providers()
            .iter()
            .rev()
            .find_map(|provider| provider.get(key))
    }

    /// Writes `value` to every provider.
    ///
    /// Watchers are not signalled; call [`Configuration::reload`] to publish a batch of changes.
    pub fn set(&self, key: &str, value: impl Into<String>) {
        let value = value.into();
        let mut providers = self
            .inner
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for provider in providers.iter_mut() {
            provider.set(key, value.clone());
        }
    }

    /// Returns the section at `path`. A missing section is empty, not an error.
    pub fn section(&self, path: &str) -> ConfigurationSection {
        ConfigurationSection {
            config: self.clone(),
            path: path.to_string(),
        }
    }

    /// Returns the section spanning the whole configuration.
    pub fn root(&self) -> ConfigurationSection {
        self.section("")
    }

    /// Returns the top-level sections.
    pub fn children(&self) -> Vec<ConfigurationSection> {
        self.root().children()
    }

    /// Returns a token that fires on the next [`Configuration::reload`].
    pub fn reload_token(&self) -> ChangeToken {
        self.inner
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .token()
    }

    /// Reloads every provider, then fires the current reload token.
    ///
    /// The token is fired even when a provider fails, so that watchers observe the
    /// providers that did load.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let mut result = Ok(());
        {
            let mut providers = self
                .inner
                .providers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for provider in providers.iter_mut() {
                if let Err(err) = provider.load() {
                    tracing::warn!(error = %err, "Cannot reload configuration provider");
                    if result.is_ok() {
                        result = Err(ConfigError::Provider(err));
                    }
                }
            }
        }
        let fired = take(
            &mut *self
                .inner
                .trigger
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        tracing::debug!("Configuration reloaded");
        fired.fire();
        result
    }

    /// Returns a handle that does not keep the configuration alive.
    pub fn downgrade(&self) -> WeakConfiguration {
        WeakConfiguration {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn providers(&self) -> std::sync::RwLockReadGuard<'_, Vec<Box<dyn ConfigurationProvider>>> {
        self.inner
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Distinct child segments below `path`, in configuration key order.
    fn child_keys(&self, path: &str) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for provider in self.providers().iter() {
            for key in provider.child_keys(path) {
                if !keys.iter().any(|k| k.eq_ignore_ascii_case(&key)) {
                    keys.push(key);
                }
            }
        }
        keys.sort_by(|a, b| compare_keys(a, b));
        keys
    }
}

/// Orders numeric segments numerically and before other segments, which compare
/// case-insensitively.
fn compare_keys(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a
            .to_ascii_lowercase()
            .cmp(&b.to_ascii_lowercase()),
    }
}

/// View of one node of a [`Configuration`].
#[derive(Clone)]
pub struct ConfigurationSection {
    config: Configuration,
    path: String,
}

impl ConfigurationSection {
    /// Last segment of the path.
    pub fn key(&self) -> &str {
        self.path
            .rsplit(KEY_DELIMITER)
            .next()
            .unwrap_or_default()
    }

    /// Full path of the section from the root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Value stored at the section path. The root section has no value.
    pub fn value(&self) -> Option<String> {
        if self.path.is_empty() {
            return None;
        }
        self.config.get(&self.path)
    }

    /// Value of the descendant at the relative path `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(&self.child_path(key))
    }

    /// Returns the descendant section at the relative path `key`.
    pub fn section(&self, key: &str) -> ConfigurationSection {
        self.config.section(&self.child_path(key))
    }

    /// Returns the direct child sections, numeric keys first in numeric order.
    pub fn children(&self) -> Vec<ConfigurationSection> {
        self.config
            .child_keys(&self.path)
            .into_iter()
            .map(|key| self.section(&key))
            .collect()
    }

    /// Whether the section has a value or any children.
    pub fn exists(&self) -> bool {
        self.value().is_some() || !self.config.child_keys(&self.path).is_empty()
    }

    /// Returns the configuration this section belongs to.
    pub fn configuration(&self) -> &Configuration {
        &self.config
    }

    /// Converts the subtree into a JSON tree with string leaves.
    ///
    /// A section with children becomes an object, a section with only a value becomes
    /// a string, and a missing section becomes `null`.
    pub fn to_value(&self) -> serde_json::Value {
        let children = self.children();
        if children.is_empty() {
            return match self.value() {
                Some(v) => serde_json::Value::String(v),
                None => serde_json::Value::Null,
            };
        }
        let mut map = serde_json::Map::new();
        for child in children {
            map.insert(child.key().to_string(), child.to_value());
        }
        serde_json::Value::Object(map)
    }

    fn child_path(&self, key: &str) -> String {
        if self.path.is_empty() {
            key.to_string()
        } else {
            format!("{}{KEY_DELIMITER}{key}", self.path)
        }
    }
}

impl std::fmt::Debug for ConfigurationSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationSection")
            .field("path", &self.path)
            .field("value", &self.value())
            .finish()
    }
}
