//! # knob
//!
//! Typed options for Rust applications, resolved through a small module container.
//!
//! ## Core Concepts
//!
//! - **Container**: Holds components and the options registrations collected at build time
//! - **Module**: A unit of registrations applied once to a [`ContainerBuilder`]
//! - **ServiceCollection**: Ordered configure and post-configure callbacks per options type
//! - **Options holders**: [`Options`], [`OptionsSnapshot`] and [`OptionsMonitor`] resolve
//!   values with different lifetimes
//! - **Change tokens**: One-shot signals that invalidate cached options values
//!
//! ## Basic Usage
//!
//! ```rust
//! use knob::{ConfigureOptionsExt as _, Container};
//!
//! #[derive(Default)]
//! struct DatabaseOptions {
//!     url: String,
//!     pool_size: usize,
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let container = Container::builder()
//!         .configure_default(|_, options: &mut DatabaseOptions| {
//!             options.url = "sqlite::memory:".to_string();
//!         })
//!         .post_configure_all(|_, options: &mut DatabaseOptions| {
//!             options.pool_size = options.pool_size.max(1);
//!         })
//!         .build()
//!         .await?;
//!
//!     let options = container.options::<DatabaseOptions>()?;
//!     assert_eq!(options.url, "sqlite::memory:");
//!     assert_eq!(options.pool_size, 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Named Instances
//!
//! Several instances of one options type can coexist under different names. The
//! unnamed instance uses [`DEFAULT_NAME`].
//!
//! ```rust
//! use knob::{ConfigureOptionsExt as _, Container};
//!
//! #[derive(Default)]
//! struct CacheOptions {
//!     capacity: usize,
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let container = Container::builder()
//!         .configure("sessions", |_, options: &mut CacheOptions| options.capacity = 64)
//!         .configure("pages", |_, options: &mut CacheOptions| options.capacity = 1024)
//!         .build()
//!         .await?;
//!
//!     let snapshot = container.options_snapshot::<CacheOptions>();
//!     assert_eq!(snapshot.get("sessions")?.capacity, 64);
//!     assert_eq!(snapshot.get("pages")?.capacity, 1024);
//!     assert_eq!(snapshot.value()?.capacity, 0);
//!     Ok(())
//! }
//! ```

mod change;
mod configure;
mod container;
mod options;
mod services;

pub use change::*;
pub use configure::*;
pub use container::*;
pub use options::*;
pub use services::*;

/// Type alias for boxed errors that can be sent across threads.
///
/// Module builds and options callbacks fail with this type.
pub type StdError = Box<dyn std::error::Error + Send + Sync>;
