//! The transport contract the bus is layered on.
//!
//! A transport moves decoded JSON values between two cooperating processes.
//! Process creation, framing and serialization are the transport's business;
//! the bus only needs a synchronous `send` and one ordered inbound stream.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::TransportResult;

/// Ordered stream of values received from the peer, one per inbound message.
pub type Inbound = mpsc::UnboundedReceiver<Value>;

/// Bidirectional value channel to a peer.
pub trait Transport: Send + Sync {
    /// Hands `value` to the channel.
    ///
    /// Must not block. A failure here means the value never left this process.
    fn send(&self, value: Value) -> TransportResult<()>;

    /// Takes the inbound stream.
    ///
    /// The stream has a single consumer; taking it twice returns
    /// [`TransportError::AlreadySubscribed`](crate::TransportError::AlreadySubscribed).
    fn take_inbound(&self) -> TransportResult<Inbound>;
}

/// Shared transport.
pub type BoxedTransport = Arc<dyn Transport>;
