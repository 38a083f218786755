use std::any::{Any, TypeId, type_name};
use std::collections::{HashMap, HashSet, hash_map};
use std::mem::take;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{ServiceCollection, StdError};

/// Built container holding components and the options registry.
///
/// The container is a cheap handle: clones share the same components, registrations
/// and cached options holders.
///
/// # Examples
///
/// ```rust
/// use knob::Container;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let container = Container::builder()
///     .add_component("Hello, World!".to_string())
///     .build()
///     .await?;
///
/// let message = container.get_component::<String>().unwrap();
/// assert_eq!(message, "Hello, World!");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Container {
    pub(crate) inner: Arc<ContainerInner>,
}

pub(crate) struct ContainerInner {
    components: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    services: ServiceCollection,
    singletons: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

/// Errors that can occur while building a container.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// A circular dependency was detected between modules.
    #[error("Circular dependency detected")]
    CircularDependency,
    /// A module depends on a module that was never registered.
    #[error("Missing dependency")]
    MissingDependency,
    /// A module failed while registering its content.
    #[error("Module error: {0}")]
    ModuleError(#[from] StdError),
}

impl Container {
    /// Creates a new builder for configuring and building a container.
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder {
            components: HashMap::new(),
            modules: HashMap::new(),
            pending_modules: Vec::new(),
            services: ServiceCollection::new(),
        }
    }

    /// Retrieves a clone of a component by type.
    pub fn get_component<T>(&self) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.get_component_ref().cloned()
    }

    /// Checks if a component of the specified type exists in the container.
    pub fn has_component<T>(&self) -> bool
    where
        T: Send + Sync + 'static,
    {
        self.inner.components.contains_key(&TypeId::of::<T>())
    }

    /// Retrieves a reference to a component by type.
    pub fn get_component_ref<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.inner
            .components
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    /// Returns the merged options registrations of this container.
    pub fn services(&self) -> &ServiceCollection {
        &self.inner.services
    }

    pub(crate) fn downgrade(&self) -> Weak<ContainerInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(inner: &Weak<ContainerInner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    pub(crate) fn singleton<S>(&self) -> Option<Arc<S>>
    where
        S: Send + Sync + 'static,
    {
        let value = self.inner.singletons.get(&TypeId::of::<S>())?.value().clone();
        value.downcast::<S>().ok()
    }

    /// Stores `value` unless another thread stored a singleton of the same type first.
    ///
    /// Returns the stored singleton and whether it is `value`.
    pub(crate) fn insert_singleton<S>(&self, value: Arc<S>) -> (Arc<S>, bool)
    where
        S: Send + Sync + 'static,
    {
        let stored = self
            .inner
            .singletons
            .entry(TypeId::of::<S>())
            .or_insert_with(|| value.clone() as Arc<dyn Any + Send + Sync>)
            .value()
            .clone();
        match stored.downcast::<S>() {
            Ok(stored) => {
                let inserted = Arc::ptr_eq(&stored, &value);
                (stored, inserted)
            }
            Err(_) => (value, true),
        }
    }
}

/// Builder for constructing a [`Container`] from modules, components and options registrations.
///
/// # Examples
///
/// ```rust
/// use knob::{Container, ConfigureOptionsExt as _};
///
/// #[derive(Default)]
/// struct ServerOptions {
///     port: u16,
/// }
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let container = Container::builder()
///     .configure_default(|_, options: &mut ServerOptions| options.port = 8080)
///     .build()
///     .await?;
///
/// assert_eq!(container.options::<ServerOptions>()?.port, 8080);
/// # Ok(())
/// # }
/// ```
pub struct ContainerBuilder {
    components: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    modules: HashMap<TypeId, Arc<dyn DynModule>>,
    pending_modules: Vec<TypeId>,
    services: ServiceCollection,
}

impl ContainerBuilder {
    /// Adds a module to the builder.
    ///
    /// Modules are built in dependency order during [`ContainerBuilder::build`].
    ///
    /// # Panics
    ///
    /// Panics if a module of the same type has already been added. Use
    /// [`ContainerBuilder::register_module`] for idempotent registration.
    pub fn add_module<T>(&mut self, module: T) -> &mut Self
    where
        T: Module + 'static,
    {
        let type_id = TypeId::of::<T>();
        match self.modules.entry(type_id) {
            hash_map::Entry::Occupied(_) => panic!("Module {} already added", module.name()),
            hash_map::Entry::Vacant(v) => {
                v.insert(Arc::new(module));
                self.pending_modules.push(type_id);
            }
        };
        self
    }

    /// Adds a default-constructed module unless one of the same type is already present.
    pub fn register_module<T>(&mut self) -> &mut Self
    where
        T: Module + Default + 'static,
    {
        if !self.has_module::<T>() {
            tracing::debug!(module = type_name::<T>(), "Registering module");
            self.add_module(T::default());
        }
        self
    }

    /// Checks if a module of the specified type has been added.
    pub fn has_module<T>(&self) -> bool
    where
        T: Module + 'static,
    {
        self.modules.contains_key(&TypeId::of::<T>())
    }

    /// Adds a component directly to the builder.
    ///
    /// # Panics
    ///
    /// Panics if a component of the same type has already been added.
    pub fn add_component<T>(&mut self, component: T) -> &mut Self
    where
        T: Send + Sync + 'static,
    {
        match self.components.entry(TypeId::of::<T>()) {
            hash_map::Entry::Occupied(_) => panic!("Component {} already added", type_name::<T>()),
            hash_map::Entry::Vacant(v) => {
                v.insert(Box::new(component));
            }
        };
        self
    }

    /// Retrieves a clone of a component added so far.
    pub fn get_component<T>(&self) -> Option<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.get_component_ref().cloned()
    }

    /// Checks if a component of the specified type has been added.
    pub fn has_component<T>(&self) -> bool
    where
        T: Send + Sync + 'static,
    {
        self.components.contains_key(&TypeId::of::<T>())
    }

    /// Retrieves a reference to a component added so far.
    pub fn get_component_ref<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.components
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    /// Retrieves a mutable reference to a component added so far.
    pub fn get_component_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.components
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut::<T>())
    }

    /// Returns the options registrations collected so far.
    pub fn services(&self) -> &ServiceCollection {
        &self.services
    }

    /// Runs `func` against a transient [`ServiceCollection`] and merges it into the builder.
    pub fn populate<F>(&mut self, func: F) -> &mut Self
    where
        F: FnOnce(&mut ServiceCollection),
    {
        let mut services = ServiceCollection::new();
        func(&mut services);
        self.services.extend(services);
        self
    }

    /// Like [`ContainerBuilder::populate`], but the transient collection is discarded
    /// when `func` fails.
    pub fn try_populate<F, E>(&mut self, func: F) -> Result<&mut Self, E>
    where
        F: FnOnce(&mut ServiceCollection) -> Result<(), E>,
    {
        let mut services = ServiceCollection::new();
        func(&mut services)?;
        self.services.extend(services);
        Ok(self)
    }

    pub async fn build(&mut self) -> Result<Container, ContainerError> {
        let mut resolver = BuildOrder::default();
        while !self.pending_modules.is_empty() {
            let mut order = Vec::new();
            let pending_modules = take(&mut self.pending_modules);
            for type_id in &pending_modules {
                if let Some(module) = self.modules.get(type_id) {
                    resolver
                        .graph
                        .insert(*type_id, module.dependencies().modules);
                }
            }
            for type_id in pending_modules {
                if resolver.is_visited(&type_id) || resolver.visit(type_id, &mut order)? {
                    continue;
                }
                self.pending_modules.push(type_id);
            }
            if order.is_empty() {
                return Err(ContainerError::MissingDependency);
            }
            for type_id in order {
                let Some(module) = self.modules.get(&type_id).cloned() else {
                    continue;
                };
                tracing::debug!(module = module.name(), "Building module");
                module.build(self).await?;
            }
        }
        take(&mut self.modules);
        Ok(Container {
            inner: Arc::new(ContainerInner {
                components: take(&mut self.components),
                services: take(&mut self.services),
                singletons: DashMap::new(),
            }),
        })
    }
}

/// Dependency graph of the added modules and the progress of ordering them.
#[derive(Default)]
struct BuildOrder {
    graph: HashMap<TypeId, HashSet<TypeId>>,
    // `false` while the module is on the walked path, `true` once it is ordered.
    ordered: HashMap<TypeId, bool>,
}

impl BuildOrder {
    fn is_visited(&self, type_id: &TypeId) -> bool {
        self.ordered.contains_key(type_id)
    }

    /// Appends `root` and its dependencies to `order`, dependencies first.
    ///
    /// Returns `Ok(false)` when some dependency has not been added yet. Modules on the
    /// abandoned path are left unvisited so a later round can retry them.
    fn visit(&mut self, root: TypeId, order: &mut Vec<TypeId>) -> Result<bool, ContainerError> {
        let Self { graph, ordered } = self;
        let Some(dependencies) = graph.get(&root) else {
            return Ok(false);
        };
        ordered.insert(root, false);
        let mut path = vec![(root, dependencies.iter())];
        while let Some((type_id, remaining)) = path.last_mut() {
            let type_id = *type_id;
            let Some(dependency) = remaining.next() else {
                path.pop();
                ordered.insert(type_id, true);
                order.push(type_id);
                continue;
            };
            match ordered.get(dependency) {
                Some(false) => return Err(ContainerError::CircularDependency),
                Some(true) => continue,
                None => {}
            }
            let Some(next) = graph.get(dependency) else {
                for (type_id, _) in path {
                    ordered.remove(&type_id);
                }
                return Ok(false);
            };
            ordered.insert(*dependency, false);
            path.push((*dependency, next.iter()));
        }
        Ok(true)
    }
}

/// Modules a module must be built after.
#[derive(Clone)]
pub struct Dependencies {
    modules: HashSet<TypeId>,
}

impl Dependencies {
    /// Creates an empty dependency set.
    pub fn new() -> Self {
        Self {
            modules: HashSet::new(),
        }
    }

    /// Adds a dependency on module `T`.
    pub fn module<T>(mut self) -> Self
    where
        T: Module + 'static,
    {
        self.modules.insert(TypeId::of::<T>());
        self
    }

    /// Combines two dependency sets.
    pub fn merge(mut self, other: Dependencies) -> Self {
        self.modules.extend(other.modules);
        self
    }
}

impl Default for Dependencies {
    fn default() -> Self {
        Self::new()
    }
}

/// A unit of registrations applied to a [`ContainerBuilder`] once per container.
pub trait Module: Send + Sync {
    fn build(
        &self,
        builder: &mut ContainerBuilder,
    ) -> impl Future<Output = Result<(), StdError>> + Send;

    fn dependencies(&self) -> Dependencies {
        Dependencies::new()
    }
}

#[async_trait]
trait DynModule: Send + Sync {
    async fn build(&self, builder: &mut ContainerBuilder) -> Result<(), StdError>;

    fn dependencies(&self) -> Dependencies;

    fn name(&self) -> &'static str;
}

#[async_trait]
impl<T> DynModule for T
where
    T: Module,
{
    async fn build(&self, builder: &mut ContainerBuilder) -> Result<(), StdError> {
        T::build(self, builder).await
    }

    fn dependencies(&self) -> Dependencies {
        T::dependencies(self)
    }

    fn name(&self) -> &'static str {
        type_name::<T>()
    }
}
