//! ipcbus runtime: the correlating bus plus configuration and logging.
//!
//! A [`Bus`] sits on top of any [`Transport`](ipcbus_core::Transport). It
//! sends requests with fresh ids, matches inbound responses back to the
//! waiting caller, expires requests that outlive their timeout, and
//! delivers every inbound message to subscribers as a [`Notification`].
//!
//! ```ignore
//! use std::sync::Arc;
//! use ipcbus_runtime::{Bus, Notification};
//! use ipcbus_transport::process;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (transport, _child) = process::spawn(tokio::process::Command::new("worker"))?;
//!     let bus = Bus::new(Arc::new(transport))?;
//!
//!     let sum = bus.request("+", serde_json::json!({ "a": 5, "b": 7 })).await?;
//!     assert_eq!(sum, 12);
//!
//!     bus.destroy();
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod config;
pub mod id;
pub mod logging;
pub mod notification;

// Re-exports
pub use bus::{Bus, BusBuilder, DEFAULT_REQUEST_TIMEOUT, ResponseFuture};
pub use config::{
    BusConfig, ConfigError, ConfigLoader, ConfigResult, IpcBusConfig, LoggingConfig, load_config,
};
pub use id::{IdSource, UuidIdSource};
pub use logging::LoggingBuilder;
pub use notification::{Notification, Notifications};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Commonly used logging macros.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
