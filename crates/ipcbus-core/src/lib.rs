//! # ipcbus Core
//!
//! Protocol primitives for ipcbus, a request/response and notification layer
//! over a bidirectional value channel between two processes.
//!
//! - **Envelope**: the wire unit and its validator ([`Envelope`], [`Kind`])
//! - **Correlation**: the id-keyed table of in-flight requests ([`CorrelationTable`])
//! - **Transport**: the channel contract the bus is layered on ([`Transport`])
//! - **Errors**: [`TransportError`], [`ValidationError`], [`RequestError`], [`BusError`]
//!
//! ```text
//! ┌──────────────┐  send(Value)  ┌───────────┐        ┌──────────────┐
//! │     Bus      │──────────────▶│ Transport │◀──────▶│     Peer     │
//! │ (runtime)    │◀──────────────│           │        │              │
//! └──────────────┘    Inbound    └───────────┘        └──────────────┘
//! ```

pub mod correlation;
pub mod envelope;
pub mod error;
pub mod transport;

pub use correlation::{CorrelationError, CorrelationTable, Rejected};
pub use envelope::{Envelope, Header, Kind, MESSAGE_CMD};
pub use error::{
    BusError, BusResult, RequestError, RequestResult, TransportError, TransportResult,
    ValidationError,
};
pub use transport::{BoxedTransport, Inbound, Transport};
