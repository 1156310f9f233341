//! In-process transport pair.

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::trace;

use ipcbus_core::{Inbound, Transport, TransportError, TransportResult};

/// One end of an in-process channel pair.
///
/// Whatever one end sends arrives, in order, on the other end's inbound
/// stream. Sending fails once the peer's inbound stream has been dropped.
pub struct MemoryTransport {
    outbound: mpsc::UnboundedSender<Value>,
    inbound: Mutex<Option<Inbound>>,
}

impl MemoryTransport {
    /// Creates two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();

        let a = Self {
            outbound: b_tx,
            inbound: Mutex::new(Some(a_rx)),
        };
        let b = Self {
            outbound: a_tx,
            inbound: Mutex::new(Some(b_rx)),
        };
        (a, b)
    }

    /// Returns true if the peer's inbound stream is gone.
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

impl Transport for MemoryTransport {
    fn send(&self, value: Value) -> TransportResult<()> {
        trace!("Sending value over memory transport");
        self.outbound
            .send(value)
            .map_err(|_| TransportError::closed("peer inbound stream dropped"))
    }

    fn take_inbound(&self) -> TransportResult<Inbound> {
        self.inbound
            .lock()
            .take()
            .ok_or(TransportError::AlreadySubscribed)
    }
}
