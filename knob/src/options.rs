use std::any::type_name;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use dashmap::DashMap;

use crate::container::ContainerInner;
use crate::{ChangeTokenSource, Container, StdError, on_change};

/// Instance name used when no name is given.
pub const DEFAULT_NAME: &str = "";

/// Errors surfaced while resolving options.
#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    /// A configure or post-configure callback failed.
    #[error("Cannot configure {type_name} (name: {name:?}): {source}")]
    Configure {
        type_name: &'static str,
        name: String,
        #[source]
        source: StdError,
    },
    /// A change token source could not be created.
    #[error("Cannot create change token source for {type_name}: {source}")]
    ChangeTokenSource {
        type_name: &'static str,
        #[source]
        source: StdError,
    },
    /// The container owning a monitor has been dropped.
    #[error("Container has been dropped")]
    ContainerDropped,
}

/// Current value of the default instance, computed once per container.
pub struct Options<T> {
    value: Arc<T>,
}

impl<T> Options<T> {
    /// Returns the options value.
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Consumes the holder, returning the shared value.
    pub fn into_inner(self) -> Arc<T> {
        self.value
    }
}

impl<T> Clone for Options<T> {
    fn clone(&self) -> Self {
        Self {
            value: self.value.clone(),
        }
    }
}

impl<T> Deref for Options<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Values computed on first access per name and kept for the lifetime of the snapshot.
///
/// Every call to [`Container::options_snapshot`] starts a new snapshot, so holding one
/// gives a consistent view for a unit of work (a request, a job) while a fresh one
/// observes configuration changes.
pub struct OptionsSnapshot<T> {
    container: Container,
    values: DashMap<String, Arc<T>>,
}

impl<T> OptionsSnapshot<T>
where
    T: Default + Send + Sync + 'static,
{
    /// Returns the default instance of this snapshot.
    pub fn value(&self) -> Result<Arc<T>, OptionsError> {
        self.get(DEFAULT_NAME)
    }

    /// Returns the instance named `name`, computing it on first access.
    pub fn get(&self, name: &str) -> Result<Arc<T>, OptionsError> {
        if let Some(value) = self.values.get(name) {
            return Ok(value.clone());
        }
        let value = Arc::new(self.container.create_options::<T>(name)?);
        Ok(self
            .values
            .entry(name.to_string())
            .or_insert(value)
            .value()
            .clone())
    }
}

type Listener<T> = Arc<dyn Fn(&T, &str) + Send + Sync>;

/// Cached values that are recomputed when a change token source of their name fires.
pub struct OptionsMonitor<T> {
    inner: Arc<MonitorInner<T>>,
}

impl<T> Clone for OptionsMonitor<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct MonitorInner<T> {
    container: Weak<ContainerInner>,
    cache: DashMap<String, Arc<T>>,
    // Bumped by every invalidation; values computed across a bump are not cached.
    generation: AtomicU64,
    listeners: RwLock<Vec<Listener<T>>>,
}

impl<T> OptionsMonitor<T>
where
    T: Default + Send + Sync + 'static,
{
    /// Returns the cached default instance, computing it if it was evicted.
    pub fn current_value(&self) -> Result<Arc<T>, OptionsError> {
        self.get(DEFAULT_NAME)
    }

    /// Returns the cached instance named `name`, computing it if it was evicted.
    pub fn get(&self, name: &str) -> Result<Arc<T>, OptionsError> {
        self.inner.get(name)
    }

    /// Registers a listener called with the recomputed value and its name after a change.
    pub fn on_change<F>(&self, listener: F)
    where
        F: Fn(&T, &str) + Send + Sync + 'static,
    {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(listener));
    }
}

impl<T> MonitorInner<T>
where
    T: Default + Send + Sync + 'static,
{
    fn get(&self, name: &str) -> Result<Arc<T>, OptionsError> {
        if let Some(value) = self.cache.get(name) {
            return Ok(value.clone());
        }
        let container =
            Container::upgrade(&self.container).ok_or(OptionsError::ContainerDropped)?;
        let generation = self.generation.load(Ordering::Acquire);
        let value = Arc::new(container.create_options::<T>(name)?);
        // The entry guard holds the shard lock, so an invalidation either bumps the
        // generation before this check or evicts after the insert.
        let entry = self.cache.entry(name.to_string());
        if self.generation.load(Ordering::Acquire) != generation {
            return Ok(value);
        }
        Ok(entry.or_insert(value).value().clone())
    }

    fn invalidate(&self, name: &str) {
        tracing::debug!(
            options = type_name::<T>(),
            name,
            "Options changed, evicting cached value"
        );
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.remove(name);
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if listeners.is_empty() {
            return;
        }
        match self.get(name) {
            Ok(value) => {
                for listener in listeners {
                    listener(&value, name);
                }
            }
            Err(e) => {
                tracing::warn!(
                    options = type_name::<T>(),
                    name,
                    error = %e,
                    "Cannot recompute changed options"
                );
            }
        }
    }
}

impl Container {
    /// Creates a fresh value of `T` for `name`, bypassing every cache.
    ///
    /// The value starts as `T::default()`, then every configure callback runs in
    /// registration order, then every post-configure callback.
    pub fn create_options<T>(&self, name: &str) -> Result<T, OptionsError>
    where
        T: Default + Send + Sync + 'static,
    {
        let mut options = T::default();
        let Some(registrations) = self.services().registrations::<T>() else {
            return Ok(options);
        };
        let callbacks = registrations
            .configures()
            .chain(registrations.post_configures());
        for callback in callbacks {
            callback
                .configure(self, name, &mut options)
                .map_err(|source| OptionsError::Configure {
                    type_name: type_name::<T>(),
                    name: name.to_string(),
                    source,
                })?;
        }
        Ok(options)
    }

    /// Returns the default instance of `T`, computed on first use and never refreshed.
    pub fn options<T>(&self) -> Result<Options<T>, OptionsError>
    where
        T: Default + Send + Sync + 'static,
    {
        if let Some(options) = self.singleton::<Options<T>>() {
            return Ok(options.as_ref().clone());
        }
        let options = Arc::new(Options {
            value: Arc::new(self.create_options::<T>(DEFAULT_NAME)?),
        });
        let (options, _) = self.insert_singleton(options);
        Ok(options.as_ref().clone())
    }

    /// Starts a new snapshot of `T`.
    pub fn options_snapshot<T>(&self) -> OptionsSnapshot<T>
    where
        T: Default + Send + Sync + 'static,
    {
        OptionsSnapshot {
            container: self.clone(),
            values: DashMap::new(),
        }
    }

    /// Returns the monitor of `T`, shared by every caller of this container.
    pub fn options_monitor<T>(&self) -> Result<OptionsMonitor<T>, OptionsError>
    where
        T: Default + Send + Sync + 'static,
    {
        if let Some(inner) = self.singleton::<MonitorInner<T>>() {
            return Ok(OptionsMonitor { inner });
        }
        let mut sources: Vec<Arc<dyn ChangeTokenSource>> = Vec::new();
        if let Some(registrations) = self.services().registrations::<T>() {
            for factory in registrations.change_token_sources() {
                sources.push(
                    factory(self).map_err(|source| OptionsError::ChangeTokenSource {
                        type_name: type_name::<T>(),
                        source,
                    })?,
                );
            }
        }
        let (inner, inserted) = self.insert_singleton(Arc::new(MonitorInner {
            container: self.downgrade(),
            cache: DashMap::new(),
            generation: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
        }));
        if inserted {
            for source in sources {
                let monitor = Arc::downgrade(&inner);
                let producer = source.clone();
                on_change(
                    move || producer.change_token(),
                    move || match monitor.upgrade() {
                        Some(monitor) => {
                            monitor.invalidate(source.name());
                            true
                        }
                        None => false,
                    },
                );
            }
        }
        Ok(OptionsMonitor { inner })
    }
}
