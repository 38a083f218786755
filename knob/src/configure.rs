use crate::{Container, ContainerBuilder, DEFAULT_NAME, Dependencies, Module, StdError};

/// Anchor module registered by every options registration made on a [`ContainerBuilder`].
#[derive(Default)]
pub struct OptionsModule;

impl Module for OptionsModule {
    async fn build(&self, builder: &mut ContainerBuilder) -> Result<(), StdError> {
        tracing::debug!(
            options_types = builder.services().len(),
            "Options registrations collected"
        );
        Ok(())
    }

    fn dependencies(&self) -> Dependencies {
        Dependencies::new()
    }
}

/// Extension trait exposing options registrations on [`ContainerBuilder`].
///
/// Every method registers [`OptionsModule`] once and forwards to the
/// [`ServiceCollection`](crate::ServiceCollection) method of the same name.
pub trait ConfigureOptionsExt {
    fn configure<T, F>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container, &mut T) + Send + Sync + 'static;

    fn configure_default<T, F>(&mut self, func: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container, &mut T) + Send + Sync + 'static;

    fn configure_all<T, F>(&mut self, func: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container, &mut T) + Send + Sync + 'static;

    fn post_configure<T, F>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container, &mut T) + Send + Sync + 'static;

    fn post_configure_default<T, F>(&mut self, func: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container, &mut T) + Send + Sync + 'static;

    fn post_configure_all<T, F>(&mut self, func: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container, &mut T) + Send + Sync + 'static;
}

impl ConfigureOptionsExt for ContainerBuilder {
    fn configure<T, F>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container, &mut T) + Send + Sync + 'static,
    {
        let name = name.into();
        self.register_module::<OptionsModule>()
            .populate(|services| {
                services.configure::<T, F>(name, func);
            })
    }

    fn configure_default<T, F>(&mut self, func: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container, &mut T) + Send + Sync + 'static,
    {
        ConfigureOptionsExt::configure::<T, F>(self, DEFAULT_NAME, func)
    }

    fn configure_all<T, F>(&mut self, func: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container, &mut T) + Send + Sync + 'static,
    {
        self.register_module::<OptionsModule>()
            .populate(|services| {
                services.configure_all::<T, F>(func);
            })
    }

    fn post_configure<T, F>(&mut self, name: impl Into<String>, func: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container, &mut T) + Send + Sync + 'static,
    {
        let name = name.into();
        self.register_module::<OptionsModule>()
            .populate(|services| {
                services.post_configure::<T, F>(name, func);
            })
    }

    fn post_configure_default<T, F>(&mut self, func: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container, &mut T) + Send + Sync + 'static,
    {
        ConfigureOptionsExt::post_configure::<T, F>(self, DEFAULT_NAME, func)
    }

    fn post_configure_all<T, F>(&mut self, func: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container, &mut T) + Send + Sync + 'static,
    {
        self.register_module::<OptionsModule>()
            .populate(|services| {
                services.post_configure_all::<T, F>(func);
            })
    }
}
