use knob::StdError;

/// Errors raised while registering configuration bindings or loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required registration argument is empty or malformed.
    #[error("Invalid argument `{argument}`: {reason}")]
    InvalidArgument {
        argument: &'static str,
        reason: &'static str,
    },
    /// A configuration provider failed to load.
    #[error("Cannot load configuration provider: {0}")]
    Provider(#[source] StdError),
    /// No [`Configuration`](crate::Configuration) component was added to the container.
    #[error("Configuration component is missing")]
    MissingConfiguration,
}

/// Checks that `section` is a usable section path.
///
/// A section path is a non-empty sequence of `:` delimited, non-empty segments.
pub(crate) fn validate_section(section: &str) -> Result<(), ConfigError> {
    if section.is_empty() {
        return Err(ConfigError::InvalidArgument {
            argument: "section",
            reason: "section path must not be empty",
        });
    }
    if section.split(crate::KEY_DELIMITER).any(str::is_empty) {
        return Err(ConfigError::InvalidArgument {
            argument: "section",
            reason: "section path must not contain empty segments",
        });
    }
    Ok(())
}
