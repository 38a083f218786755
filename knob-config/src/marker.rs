use std::any::type_name;

use knob::{
    ContainerBuilder, DEFAULT_NAME, Dependencies, Module, OptionsModule, ServiceCollection,
    StdError,
};

use crate::container::register_configuration_modules;
use crate::error::validate_section;
use crate::{BinderOptions, Bindable, ConfigError, ConfigureSectionExt, OptionsType};

/// Binding declared by an options type: an optional instance name and a section path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionsMarker {
    pub name: Option<&'static str>,
    pub section: &'static str,
}

impl OptionsMarker {
    /// Binds `section` onto the default instance.
    pub const fn section(section: &'static str) -> Self {
        Self {
            name: None,
            section,
        }
    }

    /// Binds `section` onto the instance named `name`.
    pub const fn named(name: &'static str, section: &'static str) -> Self {
        Self {
            name: Some(name),
            section,
        }
    }
}

/// Options types declaring their own configuration bindings.
///
/// Usually implemented with the `#[register_options]` attribute, which lists one marker
/// per attribute in declaration order:
///
/// ```rust
/// use knob_config::{OptionsMarker, RegisterOptions, register_options};
/// use serde::{Deserialize, Serialize};
///
/// #[register_options("Database")]
/// #[register_options("replica", "Database:Replica")]
/// #[derive(Default, Serialize, Deserialize)]
/// #[serde(default)]
/// struct DatabaseOptions {
///     url: String,
/// }
///
/// assert_eq!(
///     DatabaseOptions::markers(),
///     vec![
///         OptionsMarker::section("Database"),
///         OptionsMarker::named("replica", "Database:Replica"),
///     ]
/// );
/// ```
pub trait RegisterOptions: Bindable {
    fn markers() -> Vec<OptionsMarker>;
}

/// Applies the markers of one options type.
pub struct RegisterOptionsHandler;

impl RegisterOptionsHandler {
    /// Registers one binding per marker, in order.
    ///
    /// A marker with a name binds that named instance, a marker without binds the
    /// default instance.
    pub fn register(
        services: &mut ServiceCollection,
        options_type: &OptionsType,
        markers: &[OptionsMarker],
    ) -> Result<(), ConfigError> {
        for marker in markers {
            tracing::debug!(
                options = options_type.type_name(),
                name = marker.name,
                section = marker.section,
                "Applying options marker"
            );
            let name = marker.name.unwrap_or(DEFAULT_NAME);
            services.configure_section_dyn(
                options_type,
                name,
                marker.section,
                BinderOptions::default(),
            )?;
        }
        Ok(())
    }
}

/// Options types recorded by [`RegisterOptionsExt::register_options`], in insertion order.
#[derive(Default)]
pub struct OptionsRegistrationTable {
    entries: Vec<(OptionsType, Vec<OptionsMarker>)>,
    processed: bool,
}

impl OptionsRegistrationTable {
    /// Number of recorded options types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks if no options type has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks if `options_type` has been recorded.
    pub fn contains(&self, options_type: &OptionsType) -> bool {
        self.entries.iter().any(|(t, _)| t == options_type)
    }

    /// Returns the markers recorded for `options_type`.
    pub fn markers(&self, options_type: &OptionsType) -> Option<&[OptionsMarker]> {
        self.entries
            .iter()
            .find(|(t, _)| t == options_type)
            .map(|(_, markers)| markers.as_slice())
    }
}

/// Module applying the [`OptionsRegistrationTable`] during container build.
#[derive(Default)]
pub struct ConfigurationOptionsModule;

impl Module for ConfigurationOptionsModule {
    async fn build(&self, builder: &mut ContainerBuilder) -> Result<(), StdError> {
        let entries = match builder.get_component_mut::<OptionsRegistrationTable>() {
            Some(table) => {
                table.processed = true;
                table.entries.clone()
            }
            None => return Ok(()),
        };
        for (options_type, markers) in entries {
            builder.try_populate(|services| {
                RegisterOptionsHandler::register(services, &options_type, &markers)
            })?;
        }
        Ok(())
    }

    fn dependencies(&self) -> Dependencies {
        Dependencies::new().module::<OptionsModule>()
    }
}

/// Declarative registration of [`RegisterOptions`] types on a [`ContainerBuilder`].
pub trait RegisterOptionsExt {
    /// Records `T` so that its markers are applied when the container is built.
    ///
    /// Markers are validated immediately. Recording the same type twice has no effect.
    fn register_options<T>(&mut self) -> Result<&mut Self, ConfigError>
    where
        T: RegisterOptions;
}

impl RegisterOptionsExt for ContainerBuilder {
    fn register_options<T>(&mut self) -> Result<&mut Self, ConfigError>
    where
        T: RegisterOptions,
    {
        let markers = T::markers();
        for marker in &markers {
            validate_section(marker.section)?;
        }
        let options_type = OptionsType::of::<T>();
        register_configuration_modules(self);
        if self
            .get_component_ref::<OptionsRegistrationTable>()
            .is_some_and(|table| table.contains(&options_type))
        {
            return Ok(self);
        }
        let processed = match self.get_component_mut::<OptionsRegistrationTable>() {
            Some(table) => {
                table.entries.push((options_type, markers.clone()));
                table.processed
            }
            None => {
                self.add_component(OptionsRegistrationTable {
                    entries: vec![(options_type, markers.clone())],
                    processed: false,
                });
                false
            }
        };
        tracing::debug!(options = type_name::<T>(), "Recorded options markers");
        if processed {
            // The table was already applied by a running build.
            self.try_populate(|services| {
                RegisterOptionsHandler::register(services, &options_type, &markers)
            })
        } else {
            Ok(self)
        }
    }
}
