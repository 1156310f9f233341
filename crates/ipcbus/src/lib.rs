//! # ipcbus
//!
//! Correlated request/response messaging between two processes that
//! exchange JSON envelopes.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  request(cmd)   ┌──────────────┐  one JSON line  ┌────────────┐
//! │  caller  │────────────────▶│     Bus      │────────────────▶│   worker   │
//! │          │◀── payload ─────│ (correlates) │◀── response ────│ (its Bus)  │
//! └──────────┘                 └──────────────┘                 └────────────┘
//!                                     │
//!                                     └──▶ Notification (every inbound message)
//! ```
//!
//! - **core**: envelope, validation, correlation table, transport trait
//! - **transport**: in-memory pairs, line-delimited streams, child processes
//! - **runtime**: the bus, configuration and logging
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ipcbus::prelude::*;
//! use ipcbus::transport::process;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (transport, _child) = process::spawn(tokio::process::Command::new("./worker"))?;
//!     let bus = Bus::new(Arc::new(transport))?;
//!
//!     let sum = bus.request("+", serde_json::json!({ "a": 5, "b": 7 })).await?;
//!     println!("5 + 7 = {sum}");
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*, `yaml-config`: configuration file formats
//! - `json-log`: JSON log lines
//! - `memory` *(default)*, `stream`, `process`, `full-transport`: transports

pub use ipcbus_core as core;
pub use ipcbus_runtime as runtime;
pub use ipcbus_transport as transport;

/// Commonly used types.
///
/// ```rust,ignore
/// use ipcbus::prelude::*;
/// ```
pub mod prelude {
    // Bus - main entry point
    pub use ipcbus_runtime::{Bus, BusBuilder, Notification, ResponseFuture};

    // Protocol
    pub use ipcbus_core::{Envelope, Kind};

    // Errors
    pub use ipcbus_core::{BusError, BusResult, RequestError, RequestResult, TransportError};

    // Transports
    pub use ipcbus_core::{BoxedTransport, Transport};
    #[cfg(feature = "memory")]
    pub use ipcbus_transport::MemoryTransport;
    #[cfg(feature = "stream")]
    pub use ipcbus_transport::StreamTransport;

    // Configuration and logging
    pub use ipcbus_runtime::{ConfigLoader, IpcBusConfig, LoggingBuilder};
}
