use knob::{ContainerBuilder, DEFAULT_NAME, OptionsModule};

use crate::error::validate_section;
use crate::{
    BinderOptions, Bindable, ConfigError, ConfigurationOptionsModule, ConfigureSectionExt,
    OptionsType,
};

/// [`ConfigureSectionExt`] counterparts on [`ContainerBuilder`].
///
/// Every method validates its arguments before touching the builder, registers the
/// configuration modules once, and forwards to the [`ServiceCollection`](knob::ServiceCollection)
/// method of the same name.
///
/// # Examples
///
/// ```rust
/// use knob::Container;
/// use knob_config::{Configuration, ConfigureSectionContainerExt as _};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Default, Serialize, Deserialize)]
/// #[serde(default)]
/// struct ServerOptions {
///     host: String,
///     port: u16,
/// }
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Configuration::from_pairs([
///         ("Server:Host", "example.org"),
///         ("Server:Port", "443"),
///     ]);
///     let container = Container::builder()
///         .add_component(config)
///         .configure_section::<ServerOptions>("Server")?
///         .build()
///         .await?;
///
///     let options = container.options::<ServerOptions>()?;
///     assert_eq!(options.host, "example.org");
///     assert_eq!(options.port, 443);
///     Ok(())
/// }
/// ```
pub trait ConfigureSectionContainerExt {
    fn configure_section_with<T>(
        &mut self,
        name: impl Into<String>,
        section: &str,
        binder: BinderOptions,
    ) -> Result<&mut Self, ConfigError>
    where
        T: Bindable;

    fn configure_named_section<T>(
        &mut self,
        name: impl Into<String>,
        section: &str,
    ) -> Result<&mut Self, ConfigError>
    where
        T: Bindable;

    fn configure_section<T>(&mut self, section: &str) -> Result<&mut Self, ConfigError>
    where
        T: Bindable;

    fn configure_section_binder<T>(
        &mut self,
        section: &str,
        binder: BinderOptions,
    ) -> Result<&mut Self, ConfigError>
    where
        T: Bindable;

    fn configure_section_dyn(
        &mut self,
        options_type: &OptionsType,
        name: impl Into<String>,
        section: &str,
        binder: BinderOptions,
    ) -> Result<&mut Self, ConfigError>;

    fn configure_root<T>(&mut self, name: impl Into<String>, binder: BinderOptions) -> &mut Self
    where
        T: Bindable;
}

/// Registers the modules every configuration binding relies on.
pub(crate) fn register_configuration_modules(
    builder: &mut ContainerBuilder,
) -> &mut ContainerBuilder {
    builder
        .register_module::<OptionsModule>()
        .register_module::<ConfigurationOptionsModule>()
}

impl ConfigureSectionContainerExt for ContainerBuilder {
    fn configure_section_with<T>(
        &mut self,
        name: impl Into<String>,
        section: &str,
        binder: BinderOptions,
    ) -> Result<&mut Self, ConfigError>
    where
        T: Bindable,
    {
        ConfigureSectionContainerExt::configure_section_dyn(
            self,
            &OptionsType::of::<T>(),
            name,
            section,
            binder,
        )
    }

    fn configure_named_section<T>(
        &mut self,
        name: impl Into<String>,
        section: &str,
    ) -> Result<&mut Self, ConfigError>
    where
        T: Bindable,
    {
        ConfigureSectionContainerExt::configure_section_with::<T>(
            self,
            name,
            section,
            BinderOptions::default(),
        )
    }

    fn configure_section<T>(&mut self, section: &str) -> Result<&mut Self, ConfigError>
    where
        T: Bindable,
    {
        ConfigureSectionContainerExt::configure_section_with::<T>(
            self,
            DEFAULT_NAME,
            section,
            BinderOptions::default(),
        )
    }

    fn configure_section_binder<T>(
        &mut self,
        section: &str,
        binder: BinderOptions,
    ) -> Result<&mut Self, ConfigError>
    where
        T: Bindable,
    {
        ConfigureSectionContainerExt::configure_section_with::<T>(
            self,
            DEFAULT_NAME,
            section,
            binder,
        )
    }

    fn configure_section_dyn(
        &mut self,
        options_type: &OptionsType,
        name: impl Into<String>,
        section: &str,
        binder: BinderOptions,
    ) -> Result<&mut Self, ConfigError> {
        validate_section(section)?;
        let name = name.into();
        register_configuration_modules(self).try_populate(|services| {
            services
                .configure_section_dyn(options_type, name, section, binder)
                .map(|_| ())
        })
    }

    fn configure_root<T>(&mut self, name: impl Into<String>, binder: BinderOptions) -> &mut Self
    where
        T: Bindable,
    {
        let name = name.into();
        register_configuration_modules(self).populate(|services| {
            services.configure_root::<T>(name, binder);
        })
    }
}
