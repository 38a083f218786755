//! # knob-config
//!
//! Binding of typed options from hierarchical configuration for knob containers.
//!
//! ## Core Components
//!
//! - **Configuration**: Case-insensitive, `:` delimited key/value tree merged from providers,
//!   with a reload token fired on every reload
//! - **Binder**: Overlays a configuration section onto a serde type
//! - **Section bindings**: Register options bound from a section, re-bound after every reload
//! - **Markers**: Options types declaring their own sections with `#[register_options]`
//! - **Tracing**: A global subscriber whose filter follows the `Logging` section
//!
//! ## Quick Start
//!
//! ```rust
//! use knob::Container;
//! use knob_config::{Configuration, RegisterOptionsExt as _, register_options};
//! use serde::{Deserialize, Serialize};
//!
//! #[register_options("Test")]
//! #[derive(Default, Serialize, Deserialize)]
//! #[serde(default)]
//! struct TestOptions {
//!     foo: String,
//!     bar: i32,
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Configuration::from_pairs([("Test:Foo", "FooValue"), ("Test:Bar", "123")]);
//!     let container = Container::builder()
//!         .add_component(config)
//!         .register_options::<TestOptions>()?
//!         .build()
//!         .await?;
//!
//!     let options = container.options::<TestOptions>()?;
//!     assert_eq!(options.foo, "FooValue");
//!     assert_eq!(options.bar, 123);
//!     Ok(())
//! }
//! ```
//!
//! ## Reloading
//!
//! Monitors recompute their values after [`Configuration::reload`]:
//!
//! ```rust
//! use knob::Container;
//! use knob_config::{Configuration, ConfigureSectionContainerExt as _};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Default, Serialize, Deserialize)]
//! #[serde(default)]
//! struct PoolOptions {
//!     size: usize,
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Configuration::from_pairs([("Pool:Size", "4")]);
//!     let container = Container::builder()
//!         .add_component(config.clone())
//!         .configure_section::<PoolOptions>("Pool")?
//!         .build()
//!         .await?;
//!
//!     let monitor = container.options_monitor::<PoolOptions>()?;
//!     assert_eq!(monitor.current_value()?.size, 4);
//!
//!     config.set("Pool:Size", "16");
//!     config.reload()?;
//!     assert_eq!(monitor.current_value()?.size, 16);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `macros` (default): Enables the `#[register_options]` attribute

mod binder;
mod configuration;
mod container;
mod error;
mod marker;
mod provider;
mod registration;
mod tracing;

pub use binder::*;
pub use configuration::*;
pub use container::*;
pub use error::ConfigError;
pub use marker::*;
pub use provider::*;
pub use registration::*;
pub use tracing::*;

#[cfg(feature = "macros")]
pub use knob_config_macros::*;
