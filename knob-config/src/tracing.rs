use std::str::FromStr as _;
use std::sync::{Arc, PoisonError, RwLock};

use knob::{Container, StdError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing_subscriber::filter::{Directive, EnvFilter, ParseError};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::{Registry, reload};

use crate::{OptionsMarker, RegisterOptions};

/// Logging settings, bound from the `Logging` section.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    #[serde(serialize_with = "serialize_level", deserialize_with = "deserialize_level")]
    pub level: tracing::Level,
    pub directives: Vec<String>,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: tracing::Level::DEBUG,
            directives: Vec::new(),
        }
    }
}

impl RegisterOptions for LoggingOptions {
    fn markers() -> Vec<OptionsMarker> {
        vec![OptionsMarker::section("Logging")]
    }
}

/// Global tracing subscriber driven by [`LoggingOptions`].
///
/// The filter is rebuilt whenever the options monitor of [`LoggingOptions`] reports
/// a change, so reloading the configuration adjusts verbosity at runtime.
pub struct Tracing {
    reload_handle: reload::Handle<EnvFilter, Registry>,
    current: Arc<RwLock<LoggingOptions>>,
}

impl Tracing {
    /// Installs the global subscriber.
    ///
    /// Fails when the options cannot be resolved, a directive is malformed, or a
    /// global subscriber is already installed.
    pub fn init(container: &Container) -> Result<Self, StdError> {
        let monitor = container.options_monitor::<LoggingOptions>()?;
        let options = monitor.current_value()?;
        let (env_filter, reload_handle) = reload::Layer::new(new_env_filter(&options)?);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::Layer::default())
            .try_init()?;
        let current = Arc::new(RwLock::new(options.as_ref().clone()));
        let handle = reload_handle.clone();
        let applied = current.clone();
        monitor.on_change(move |options: &LoggingOptions, _| {
            let filter = match new_env_filter(options) {
                Ok(v) => v,
                Err(err) => {
                    tracing::error!("Cannot parse tracing directives: {err}");
                    return;
                }
            };
            if let Err(err) = handle.reload(filter) {
                tracing::error!("Cannot reload tracing filter: {err}");
                return;
            }
            *applied.write().unwrap_or_else(PoisonError::into_inner) = options.clone();
        });
        Ok(Self {
            reload_handle,
            current,
        })
    }

    /// Options of the filter currently installed.
    pub fn options(&self) -> LoggingOptions {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the filter until the next configuration change.
    pub fn apply(&self, options: &LoggingOptions) -> Result<(), StdError> {
        self.reload_handle.reload(new_env_filter(options)?)?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = options.clone();
        Ok(())
    }
}

fn new_env_filter(options: &LoggingOptions) -> Result<EnvFilter, ParseError> {
    let mut filter = EnvFilter::default();
    for directive in &options.directives {
        filter = filter.add_directive(directive.parse::<Directive>()?);
    }
    Ok(filter.add_directive(options.level.into()))
}

fn serialize_level<S>(v: &tracing::Level, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(v.as_str())
}

fn deserialize_level<'de, D>(deserializer: D) -> Result<tracing::Level, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    String::deserialize(deserializer)
        .and_then(|v| tracing::Level::from_str(v.trim()).map_err(|v| Error::custom(format!("{v}"))))
}
