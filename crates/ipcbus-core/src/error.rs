//! Unified error types for the ipcbus core.
//!
//! Errors tied to a single request travel through that request's future
//! ([`RequestError`]); everything else is either reported to the caller of a
//! fire-and-forget send ([`BusError`]) or handled locally ([`ValidationError`]).

use std::time::Duration;

use thiserror::Error;

use crate::envelope::Kind;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors raised by a [`Transport`](crate::transport::Transport).
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The value could not be handed to the underlying channel.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// The channel is closed on either side.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// The inbound stream has already been taken by another consumer.
    #[error("inbound stream already taken")]
    AlreadySubscribed,

    /// A value could not be serialized for the wire.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Spawning the peer process failed.
    #[error("failed to spawn peer process: {0}")]
    Spawn(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Creates a connection-closed error.
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Validation Errors
// =============================================================================

/// Reasons an inbound value is not a well-formed envelope.
///
/// Never returned to a bus caller; the dispatcher only logs it and raises an
/// `invalidMessage` notification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The value is not a JSON object.
    #[error("message is not an object")]
    NotAnObject,

    /// `header` is missing or not an object.
    #[error("message header is missing or not an object")]
    MissingHeader,

    /// `header.cmd` is missing, not a string or empty.
    #[error("header.cmd must be a non-empty string")]
    EmptyCommand,

    /// `header.type` is missing.
    #[error("header.type is missing")]
    MissingKind,

    /// `header.type` is not an index of a known kind.
    #[error("header.type {0} is not a known message kind")]
    UnknownKind(String),

    /// A request or response carries no usable `header.id`.
    #[error("{0} message requires a non-empty header.id")]
    MissingId(Kind),

    /// `header.id` is present but not a string.
    #[error("header.id must be a string")]
    InvalidId,

    /// The value passed the structural checks but could not be decoded.
    #[error("failed to decode envelope: {0}")]
    Decode(String),
}

// =============================================================================
// Request Errors
// =============================================================================

/// Ways a correlated request can fail.
#[derive(Debug, Clone, Error)]
pub enum RequestError {
    /// No response arrived before the request's timer fired.
    #[error("request '{cmd}' timed out after {}ms", .timeout.as_millis())]
    Timeout {
        /// Command of the request.
        cmd: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The transport rejected the outbound request.
    #[error("failed to send request '{cmd}': {source}")]
    Send {
        /// Command of the request.
        cmd: String,
        /// The transport failure.
        #[source]
        source: TransportError,
    },

    /// The request was cancelled before a response arrived.
    #[error("request '{cmd}' was cancelled")]
    Cancelled {
        /// Command of the request.
        cmd: String,
    },

    /// The bus was already destroyed when the request was issued.
    #[error("bus has been destroyed")]
    Destroyed,

    /// The generated correlation id is already pending.
    #[error("correlation id '{0}' is already pending")]
    DuplicateId(String),
}

impl RequestError {
    /// Returns true if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true if this is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

// =============================================================================
// Bus Errors
// =============================================================================

/// Errors returned synchronously by bus operations.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// The bus has been destroyed and no longer owns a transport.
    #[error("bus has been destroyed")]
    Destroyed,

    /// The bus was built outside a Tokio runtime.
    #[error("no Tokio runtime available: {0}")]
    NoRuntime(String),

    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for a correlated request.
pub type RequestResult<T> = Result<T, RequestError>;

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_names_command() {
        let err = RequestError::Timeout {
            cmd: "noop".into(),
            timeout: Duration::from_millis(50),
        };
        assert_eq!(err.to_string(), "request 'noop' timed out after 50ms");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_send_error_keeps_source() {
        use std::error::Error;

        let err = RequestError::Send {
            cmd: "+".into(),
            source: TransportError::closed("peer exited"),
        };
        assert!(err.to_string().contains("'+'"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_missing_id_names_kind() {
        let err = ValidationError::MissingId(Kind::Response);
        assert_eq!(
            err.to_string(),
            "response message requires a non-empty header.id"
        );
    }
}
