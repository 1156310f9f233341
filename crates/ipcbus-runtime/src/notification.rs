//! Notifications raised by the bus for observers.

use serde_json::Value;
use tokio::sync::mpsc;

use ipcbus_core::{Envelope, Kind};

/// Notification stream returned by [`Bus::subscribe`](crate::Bus::subscribe).
pub type Notifications = mpsc::UnboundedReceiver<Notification>;

/// Something the bus observed on its inbound stream.
///
/// Obtained from [`Bus::subscribe`](crate::Bus::subscribe). Every valid
/// inbound envelope raises exactly one notification named after its kind;
/// every invalid inbound value raises exactly one `invalidMessage`.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The peer issued a request; answer it with
    /// [`Bus::respond_to`](crate::Bus::respond_to).
    Request(Envelope),
    /// A response arrived, whether or not it matched a pending request.
    Response(Envelope),
    /// An event arrived.
    Event(Envelope),
    /// A task arrived.
    Task(Envelope),
    /// A plain message arrived.
    Message(Envelope),
    /// An inbound value failed validation.
    InvalidMessage(Value),
}

impl Notification {
    /// Returns the notification name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::InvalidMessage(_) => "invalidMessage",
            Self::Request(envelope)
            | Self::Response(envelope)
            | Self::Event(envelope)
            | Self::Task(envelope)
            | Self::Message(envelope) => envelope.kind().name(),
        }
    }

    /// Returns the envelope, unless this is an invalid message.
    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            Self::InvalidMessage(_) => None,
            Self::Request(envelope)
            | Self::Response(envelope)
            | Self::Event(envelope)
            | Self::Task(envelope)
            | Self::Message(envelope) => Some(envelope),
        }
    }
}

impl From<Envelope> for Notification {
    fn from(envelope: Envelope) -> Self {
        match envelope.kind() {
            Kind::Request => Self::Request(envelope),
            Kind::Response => Self::Response(envelope),
            Kind::Event => Self::Event(envelope),
            Kind::Task => Self::Task(envelope),
            Kind::Message => Self::Message(envelope),
        }
    }
}
