use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::{ChangeToken, Container, StdError};

/// A callback applied to an options value while it is being created.
///
/// `name` is the instance name being resolved; implementations decide whether
/// they apply to it.
pub trait ConfigureOptions<T>: Send + Sync {
    fn configure(&self, container: &Container, name: &str, options: &mut T)
    -> Result<(), StdError>;
}

/// Signals changes that invalidate a named options value.
pub trait ChangeTokenSource: Send + Sync {
    /// Instance name whose cached value is invalidated by the tokens of this source.
    fn name(&self) -> &str;

    fn change_token(&self) -> ChangeToken;
}

pub(crate) type ChangeTokenSourceFactory =
    Arc<dyn Fn(&Container) -> Result<Arc<dyn ChangeTokenSource>, StdError> + Send + Sync>;

/// Registry of options callbacks and change token sources, grouped by options type.
///
/// Registrations made through the `try_add_*` methods carry a key: an entry whose key
/// is already present for the same options type is skipped, both on insertion and
/// when collections are merged with [`ServiceCollection::extend`].
#[derive(Default)]
pub struct ServiceCollection {
    options: HashMap<TypeId, Box<dyn ErasedRegistrations>>,
}

impl ServiceCollection {
    /// Creates an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a callback applied before every post-configure callback.
    pub fn add_configure<T, C>(&mut self, configure: C) -> &mut Self
    where
        T: Send + Sync + 'static,
        C: ConfigureOptions<T> + 'static,
    {
        let configure: Arc<dyn ConfigureOptions<T>> = Arc::new(configure);
        self.registrations_mut::<T>()
            .configures
            .push(Entry::new(None, configure));
        self
    }

    /// Adds a configure callback unless one with the same key exists for `T`.
    ///
    /// Returns `false` when the callback was skipped.
    pub fn try_add_configure<T, C>(&mut self, key: impl Into<String>, configure: C) -> bool
    where
        T: Send + Sync + 'static,
        C: ConfigureOptions<T> + 'static,
    {
        let configure: Arc<dyn ConfigureOptions<T>> = Arc::new(configure);
        push_unique(
            &mut self.registrations_mut::<T>().configures,
            Entry::new(Some(key.into()), configure),
        )
    }

    /// Adds a callback applied after every configure callback.
    pub fn add_post_configure<T, C>(&mut self, configure: C) -> &mut Self
    where
        T: Send + Sync + 'static,
        C: ConfigureOptions<T> + 'static,
    {
        let configure: Arc<dyn ConfigureOptions<T>> = Arc::new(configure);
        self.registrations_mut::<T>()
            .post_configures
            .push(Entry::new(None, configure));
        self
    }

    /// Adds a post-configure callback unless one with the same key exists for `T`.
    ///
    /// Returns `false` when the callback was skipped.
    pub fn try_add_post_configure<T, C>(&mut self, key: impl Into<String>, configure: C) -> bool
    where
        T: Send + Sync + 'static,
        C: ConfigureOptions<T> + 'static,
    {
        let configure: Arc<dyn ConfigureOptions<T>> = Arc::new(configure);
        push_unique(
            &mut self.registrations_mut::<T>().post_configures,
            Entry::new(Some(key.into()), configure),
        )
    }

    /// Adds a change token source for `T`, created when the first monitor of `T` is resolved.
    pub fn add_change_token_source<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> Result<Arc<dyn ChangeTokenSource>, StdError> + Send + Sync + 'static,
    {
        let factory: ChangeTokenSourceFactory = Arc::new(factory);
        self.registrations_mut::<T>()
            .change_token_sources
            .push(Entry::new(None, factory));
        self
    }

    /// Adds a change token source unless one with the same key exists for `T`.
    ///
    /// Returns `false` when the source was skipped.
    pub fn try_add_change_token_source<T, F>(&mut self, key: impl Into<String>, factory: F) -> bool
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> Result<Arc<dyn ChangeTokenSource>, StdError> + Send + Sync + 'static,
    {
        let factory: ChangeTokenSourceFactory = Arc::new(factory);
        push_unique(
            &mut self.registrations_mut::<T>().change_token_sources,
            Entry::new(Some(key.into()), factory),
        )
    }

    /// Registers a mutation of the instance named `name`.
    pub fn configure<T, F>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container, &mut T) + Send + Sync + 'static,
    {
        self.add_configure::<T, _>(ConfigureNamed::new(Some(name.into()), func))
    }

    /// Registers a mutation of the default instance.
    pub fn configure_default<T, F>(&mut self, func: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container, &mut T) + Send + Sync + 'static,
    {
        self.configure::<T, F>(crate::DEFAULT_NAME, func)
    }

    /// Registers a mutation applied to every instance of `T`, whatever its name.
    pub fn configure_all<T, F>(&mut self, func: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container, &mut T) + Send + Sync + 'static,
    {
        self.add_configure::<T, _>(ConfigureNamed::new(None, func))
    }

    /// Registers a mutation of the instance named `name`, applied after every configure callback.
    pub fn post_configure<T, F>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container, &mut T) + Send + Sync + 'static,
    {
        self.add_post_configure::<T, _>(ConfigureNamed::new(Some(name.into()), func))
    }

    /// Registers a post-configure mutation of the default instance.
    pub fn post_configure_default<T, F>(&mut self, func: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container, &mut T) + Send + Sync + 'static,
    {
        self.post_configure::<T, F>(crate::DEFAULT_NAME, func)
    }

    /// Registers a post-configure mutation applied to every instance of `T`.
    pub fn post_configure_all<T, F>(&mut self, func: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container, &mut T) + Send + Sync + 'static,
    {
        self.add_post_configure::<T, _>(ConfigureNamed::new(None, func))
    }

    /// Number of configure callbacks registered for `T`.
    pub fn configure_count<T>(&self) -> usize
    where
        T: Send + Sync + 'static,
    {
        self.registrations::<T>().map_or(0, |r| r.configures.len())
    }

    /// Number of post-configure callbacks registered for `T`.
    pub fn post_configure_count<T>(&self) -> usize
    where
        T: Send + Sync + 'static,
    {
        self.registrations::<T>()
            .map_or(0, |r| r.post_configures.len())
    }

    /// Number of change token source factories registered for `T`.
    pub fn change_token_source_count<T>(&self) -> usize
    where
        T: Send + Sync + 'static,
    {
        self.registrations::<T>()
            .map_or(0, |r| r.change_token_sources.len())
    }

    /// Number of options types with at least one registration.
    pub fn len(&self) -> usize {
        self.options.len()
    }

    /// Checks if no options type has any registration.
    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Moves every registration of `other` into this collection, skipping keyed
    /// entries that are already present.
    pub fn extend(&mut self, other: ServiceCollection) {
        for (_, registrations) in other.options {
            registrations.merge_into(self);
        }
    }

    pub(crate) fn registrations<T>(&self) -> Option<&OptionsRegistrations<T>>
    where
        T: Send + Sync + 'static,
    {
        self.options
            .get(&TypeId::of::<T>())
            .and_then(|v| v.as_any().downcast_ref())
    }

    fn registrations_mut<T>(&mut self) -> &mut OptionsRegistrations<T>
    where
        T: Send + Sync + 'static,
    {
        let registrations = self
            .options
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(OptionsRegistrations::<T>::default()));
        match registrations.as_any_mut().downcast_mut() {
            Some(v) => v,
            None => unreachable!("registrations of {} have a foreign type", type_name::<T>()),
        }
    }
}

struct Entry<V> {
    key: Option<String>,
    value: V,
}

impl<V> Entry<V> {
    fn new(key: Option<String>, value: V) -> Self {
        Self { key, value }
    }
}

fn push_unique<V>(entries: &mut Vec<Entry<V>>, entry: Entry<V>) -> bool {
    if let Some(key) = &entry.key
        && entries.iter().any(|e| e.key.as_ref() == Some(key))
    {
        return false;
    }
    entries.push(entry);
    true
}

pub(crate) struct OptionsRegistrations<T> {
    configures: Vec<Entry<Arc<dyn ConfigureOptions<T>>>>,
    post_configures: Vec<Entry<Arc<dyn ConfigureOptions<T>>>>,
    change_token_sources: Vec<Entry<ChangeTokenSourceFactory>>,
}

impl<T> Default for OptionsRegistrations<T> {
    fn default() -> Self {
        Self {
            configures: Vec::new(),
            post_configures: Vec::new(),
            change_token_sources: Vec::new(),
        }
    }
}

impl<T> OptionsRegistrations<T> {
    pub(crate) fn configures(&self) -> impl Iterator<Item = &Arc<dyn ConfigureOptions<T>>> {
        self.configures.iter().map(|e| &e.value)
    }

    pub(crate) fn post_configures(&self) -> impl Iterator<Item = &Arc<dyn ConfigureOptions<T>>> {
        self.post_configures.iter().map(|e| &e.value)
    }

    pub(crate) fn change_token_sources(&self) -> impl Iterator<Item = &ChangeTokenSourceFactory> {
        self.change_token_sources.iter().map(|e| &e.value)
    }
}

trait ErasedRegistrations: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn merge_into(self: Box<Self>, services: &mut ServiceCollection);
}

impl<T> ErasedRegistrations for OptionsRegistrations<T>
where
    T: Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn merge_into(self: Box<Self>, services: &mut ServiceCollection) {
        let target = services.registrations_mut::<T>();
        for entry in self.configures {
            push_unique(&mut target.configures, entry);
        }
        for entry in self.post_configures {
            push_unique(&mut target.post_configures, entry);
        }
        for entry in self.change_token_sources {
            push_unique(&mut target.change_token_sources, entry);
        }
    }
}

/// Closure-backed callback restricted to one instance name, or to all of them.
struct ConfigureNamed<T, F> {
    name: Option<String>,
    func: F,
    _marker: PhantomData<fn(&mut T)>,
}

impl<T, F> ConfigureNamed<T, F> {
    fn new(name: Option<String>, func: F) -> Self {
        Self {
            name,
            func,
            _marker: PhantomData,
        }
    }
}

impl<T, F> ConfigureOptions<T> for ConfigureNamed<T, F>
where
    F: Fn(&Container, &mut T) + Send + Sync,
{
    fn configure(
        &self,
        container: &Container,
        name: &str,
        options: &mut T,
    ) -> Result<(), StdError> {
        if self.name.as_deref().is_none_or(|n| n == name) {
            (self.func)(container, options);
        }
        Ok(())
    }
}
