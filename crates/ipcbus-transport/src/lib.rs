//! # ipcbus Transport
//!
//! Concrete [`Transport`](ipcbus_core::Transport) implementations, selected by
//! feature flags.
//!
//! ## Features
//!
//! - `memory` (default): in-process transport pair
//! - `stream`: line-delimited JSON over any async reader/writer, including stdio
//! - `process`: spawn a child process and talk to it over its stdin/stdout
//! - `full`: all of the above
//!
//! | Transport | Use Case |
//! |-----------|----------|
//! | [`MemoryTransport`] | Tests, two buses in one process |
//! | `StreamTransport` | Child side of a spawned worker (`StreamTransport::stdio()`) |
//! | `process::spawn` | Parent side: launches the worker and wires its pipes |
//!
//! ```rust,ignore
//! use ipcbus_transport::process;
//! use tokio::process::Command;
//!
//! let (transport, child) = process::spawn(Command::new("./worker"))?;
//! ```

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "stream")]
pub mod stream;

#[cfg(feature = "process")]
pub mod process;

#[cfg(feature = "memory")]
pub use memory::MemoryTransport;

#[cfg(feature = "stream")]
pub use stream::StreamTransport;
