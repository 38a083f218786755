use std::any::{TypeId, type_name};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use knob::{
    ChangeToken, ChangeTokenSource, ConfigureOptions, Container, DEFAULT_NAME, ServiceCollection,
    StdError,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::validate_section;
use crate::{BinderOptions, ConfigError, Configuration, WeakConfiguration, bind};

/// Options types that can be bound from configuration.
pub trait Bindable: Serialize + DeserializeOwned + Default + Send + Sync + 'static {}

impl<T> Bindable for T where T: Serialize + DeserializeOwned + Default + Send + Sync + 'static {}

/// Runtime token of a [`Bindable`] options type.
///
/// Carries the registration function of the type, so that callers holding only the
/// token can still register bindings for it.
#[derive(Clone, Copy)]
pub struct OptionsType {
    type_id: TypeId,
    type_name: &'static str,
    register: fn(&mut ServiceCollection, String, String, BinderOptions),
}

impl OptionsType {
    /// Captures the type token and registration function of `T`.
    pub fn of<T>() -> Self
    where
        T: Bindable,
    {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            register: add_section_binding::<T>,
        }
    }

    /// Type identifier of the options type.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Type name of the options type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl PartialEq for OptionsType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for OptionsType {}

impl fmt::Debug for OptionsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OptionsType").field(&self.type_name).finish()
    }
}

/// Binds the section at `section` onto instances named `name`.
///
/// An empty `section` binds the whole configuration.
struct ConfigureFromSection<T> {
    name: String,
    section: String,
    binder: BinderOptions,
    _marker: PhantomData<fn(&mut T)>,
}

impl<T> ConfigureOptions<T> for ConfigureFromSection<T>
where
    T: Bindable,
{
    fn configure(
        &self,
        container: &Container,
        name: &str,
        options: &mut T,
    ) -> Result<(), StdError> {
        if self.name != name {
            return Ok(());
        }
        let config = container
            .get_component_ref::<Configuration>()
            .ok_or(ConfigError::MissingConfiguration)?;
        bind(&config.section(&self.section), options, &self.binder)?;
        Ok(())
    }
}

/// Follows the reload token of the configuration for one instance name.
struct ConfigurationChangeTokenSource {
    name: String,
    config: WeakConfiguration,
}

impl ChangeTokenSource for ConfigurationChangeTokenSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn change_token(&self) -> ChangeToken {
        match self.config.upgrade() {
            Some(config) => config.reload_token(),
            None => ChangeToken::never(),
        }
    }
}

/// Adds the change token source and the configure callback binding `section` onto `T`.
///
/// Registrations are keyed: repeating a (type, name, section) registration adds
/// nothing, and every name of a type gets a single change token source.
fn add_section_binding<T>(
    services: &mut ServiceCollection,
    name: String,
    section: String,
    binder: BinderOptions,
) where
    T: Bindable,
{
    let source_name = name.clone();
    services.try_add_change_token_source::<T, _>(
        format!("configuration\0{name}"),
        move |container: &Container| {
            let config = container
                .get_component_ref::<Configuration>()
                .ok_or(ConfigError::MissingConfiguration)?;
            let source: Arc<dyn ChangeTokenSource> = Arc::new(ConfigurationChangeTokenSource {
                name: source_name.clone(),
                config: config.downgrade(),
            });
            Ok(source)
        },
    );
    let added = services.try_add_configure::<T, _>(
        format!("configuration\0{name}\0{section}"),
        ConfigureFromSection::<T> {
            name: name.clone(),
            section: section.clone(),
            binder,
            _marker: PhantomData,
        },
    );
    if added {
        tracing::debug!(
            options = type_name::<T>(),
            name,
            section,
            "Registered configuration binding"
        );
    } else {
        tracing::debug!(
            options = type_name::<T>(),
            name,
            section,
            "Configuration binding already registered"
        );
    }
}

/// Registration of configuration bindings on a [`ServiceCollection`].
///
/// Nothing is bound at registration time: the section is bound every time an
/// instance is created, so monitors observe configuration reloads. The container
/// must hold a [`Configuration`] component.
///
/// # Examples
///
/// ```rust
/// use knob::ServiceCollection;
/// use knob_config::ConfigureSectionExt as _;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Default, Serialize, Deserialize)]
/// #[serde(default)]
/// struct SmtpOptions {
///     host: String,
///     port: u16,
/// }
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut services = ServiceCollection::new();
/// services
///     .configure_section::<SmtpOptions>("Mail:Smtp")?
///     .configure_named_section::<SmtpOptions>("fallback", "Mail:Fallback")?;
/// assert_eq!(services.configure_count::<SmtpOptions>(), 2);
///
/// assert!(services.configure_section::<SmtpOptions>("Mail::Smtp").is_err());
/// # Ok(())
/// # }
/// ```
pub trait ConfigureSectionExt {
    /// Binds `section` onto instances named `name` using `binder`.
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

    /// Same as [`ConfigureSectionExt::configure_section_with`] for a type known only at runtime.
    fn configure_section_dyn(
        &mut self,
        options_type: &OptionsType,
        name: impl Into<String>,
        section: &str,
        binder: BinderOptions,
    ) -> Result<&mut Self, ConfigError>;

    /// Binds the whole configuration onto instances named `name`.
    fn configure_root<T>(&mut self, name: impl Into<String>, binder: BinderOptions) -> &mut Self
    where
        T: Bindable;
}

impl ConfigureSectionExt for ServiceCollection {
    fn configure_section_with<T>(
        &mut self,
        name: impl Into<String>,
        section: &str,
        binder: BinderOptions,
    ) -> Result<&mut Self, ConfigError>
    where
        T: Bindable,
    {
        self.configure_section_dyn(&OptionsType::of::<T>(), name, section, binder)
    }

    fn configure_named_section<T>(
        &mut self,
        name: impl Into<String>,
        section: &str,
    ) -> Result<&mut Self, ConfigError>
    where
        T: Bindable,
    {
        self.configure_section_with::<T>(name, section, BinderOptions::default())
    }

    fn configure_section<T>(&mut self, section: &str) -> Result<&mut Self, ConfigError>
    where
        T: Bindable,
    {
        self.configure_section_with::<T>(DEFAULT_NAME, section, BinderOptions::default())
    }

    fn configure_section_binder<T>(
        &mut self,
        section: &str,
        binder: BinderOptions,
    ) -> Result<&mut Self, ConfigError>
    where
        T: Bindable,
    {
        self.configure_section_with::<T>(DEFAULT_NAME, section, binder)
    }

    fn configure_section_dyn(
        &mut self,
        options_type: &OptionsType,
        name: impl Into<String>,
        section: &str,
        binder: BinderOptions,
    ) -> Result<&mut Self, ConfigError> {
        validate_section(section)?;
        (options_type.register)(self, name.into(), section.to_string(), binder);
        Ok(self)
    }

    fn configure_root<T>(&mut self, name: impl Into<String>, binder: BinderOptions) -> &mut Self
    where
        T: Bindable,
    {
        add_section_binding::<T>(self, name.into(), String::new(), binder);
        self
    }
}
