//! The envelope exchanged over the transport and its validator.
//!
//! On the wire every envelope is a JSON object:
//!
//! ```text
//! { "header": { "id"?: string, "cmd": string, "type": 0..=4 }, "payload"?: any }
//! ```
//!
//! `type` indexes [`Kind`]. `id` is mandatory for requests and responses and
//! carries the correlation between the two.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Wire command used by [`Envelope::message`], which has no command of its own.
pub const MESSAGE_CMD: &str = "message";

// =============================================================================
// Kind
// =============================================================================

/// The closed set of envelope kinds, encoded on the wire by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Kind {
    /// Correlated request; expects exactly one response.
    Request = 0,
    /// Answer to a request with the same id.
    Response = 1,
    /// Fire-and-forget event.
    Event = 2,
    /// Fire-and-forget task.
    Task = 3,
    /// Fire-and-forget plain message.
    Message = 4,
}

impl Kind {
    /// All kinds in wire order.
    pub const ALL: [Kind; 5] = [
        Kind::Request,
        Kind::Response,
        Kind::Event,
        Kind::Task,
        Kind::Message,
    ];

    /// Returns the wire index of this kind.
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Returns the lowercase name used for notifications.
    pub fn name(self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::Response => "response",
            Self::Event => "event",
            Self::Task => "task",
            Self::Message => "message",
        }
    }

    /// Returns true if envelopes of this kind must carry a correlation id.
    pub fn is_correlated(self) -> bool {
        matches!(self, Self::Request | Self::Response)
    }
}

impl From<Kind> for u8 {
    fn from(kind: Kind) -> Self {
        kind.index()
    }
}

impl TryFrom<u8> for Kind {
    type Error = ValidationError;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Kind::ALL
            .get(usize::from(index))
            .copied()
            .ok_or_else(|| ValidationError::UnknownKind(index.to_string()))
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Header / Envelope
// =============================================================================

/// Envelope metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Correlation id; present for requests and responses only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Command name.
    pub cmd: String,
    /// Envelope kind.
    #[serde(rename = "type")]
    pub kind: Kind,
}

/// The unit exchanged over the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Envelope metadata.
    pub header: Header,
    /// Optional user data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    fn build(id: Option<String>, cmd: String, kind: Kind, payload: Option<Value>) -> Self {
        Self {
            header: Header { id, cmd, kind },
            payload,
        }
    }

    /// Creates a request envelope.
    pub fn request(id: impl Into<String>, cmd: impl Into<String>, payload: Option<Value>) -> Self {
        Self::build(Some(id.into()), cmd.into(), Kind::Request, payload)
    }

    /// Creates a response envelope answering request `id`.
    pub fn response(id: impl Into<String>, cmd: impl Into<String>, payload: Option<Value>) -> Self {
        Self::build(Some(id.into()), cmd.into(), Kind::Response, payload)
    }

    /// Creates an event envelope.
    pub fn event(cmd: impl Into<String>, payload: Option<Value>) -> Self {
        Self::build(None, cmd.into(), Kind::Event, payload)
    }

    /// Creates a task envelope.
    pub fn task(cmd: impl Into<String>, payload: Option<Value>) -> Self {
        Self::build(None, cmd.into(), Kind::Task, payload)
    }

    /// Creates a plain message envelope. The wire command is [`MESSAGE_CMD`].
    pub fn message(payload: Option<Value>) -> Self {
        Self::build(None, MESSAGE_CMD.to_string(), Kind::Message, payload)
    }

    /// Returns the envelope kind.
    pub fn kind(&self) -> Kind {
        self.header.kind
    }

    /// Returns the command name.
    pub fn cmd(&self) -> &str {
        &self.header.cmd
    }

    /// Returns the correlation id, if any.
    pub fn id(&self) -> Option<&str> {
        self.header.id.as_deref()
    }

    /// Returns true if `raw` is a well-formed envelope.
    pub fn validate(raw: &Value) -> bool {
        Self::check(raw).is_ok()
    }

    /// Checks that `raw` is a well-formed envelope, reporting why not.
    ///
    /// This is the only gate between untrusted inbound values and the bus.
    pub fn check(raw: &Value) -> Result<(), ValidationError> {
        let root = raw.as_object().ok_or(ValidationError::NotAnObject)?;
        let header = root
            .get("header")
            .and_then(Value::as_object)
            .ok_or(ValidationError::MissingHeader)?;

        match header.get("cmd").and_then(Value::as_str) {
            Some(cmd) if !cmd.is_empty() => {}
            _ => return Err(ValidationError::EmptyCommand),
        }

        let kind = match header.get("type") {
            None | Some(Value::Null) => return Err(ValidationError::MissingKind),
            Some(value) => value
                .as_u64()
                .and_then(|index| u8::try_from(index).ok())
                .and_then(|index| Kind::try_from(index).ok())
                .ok_or_else(|| ValidationError::UnknownKind(value.to_string()))?,
        };

        let id = match header.get("id") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(id.as_str()),
            Some(_) => return Err(ValidationError::InvalidId),
        };

        if kind.is_correlated() && id.is_none_or(str::is_empty) {
            return Err(ValidationError::MissingId(kind));
        }

        Ok(())
    }

    /// Validates `raw` and decodes it into an envelope.
    pub fn parse(raw: Value) -> Result<Self, ValidationError> {
        Self::check(&raw)?;
        serde_json::from_value(raw).map_err(|e| ValidationError::Decode(e.to_string()))
    }

    /// Like [`parse`](Self::parse), but leaves `raw` with the caller.
    pub fn decode(raw: &Value) -> Result<Self, ValidationError> {
        Self::check(raw)?;
        Self::deserialize(raw).map_err(|e| ValidationError::Decode(e.to_string()))
    }

    /// Converts the envelope into its wire value.
    pub fn into_value(self) -> Value {
        let mut header = Map::new();
        if let Some(id) = self.header.id {
            header.insert("id".into(), Value::String(id));
        }
        header.insert("cmd".into(), Value::String(self.header.cmd));
        header.insert("type".into(), Value::from(self.header.kind.index()));

        let mut root = Map::new();
        root.insert("header".into(), Value::Object(header));
        if let Some(payload) = self.payload {
            root.insert("payload".into(), payload);
        }
        Value::Object(root)
    }
}

impl From<Envelope> for Value {
    fn from(envelope: Envelope) -> Self {
        envelope.into_value()
    }
}
