//! Configuration module for the ipcbus runtime.
//!
//! Layered loading (defaults, files, environment) with validation.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config};
pub use schema::{BusConfig, IpcBusConfig, LogFormat, LogLevel, LogOutput, LoggingConfig};
pub use validation::validate_config;
