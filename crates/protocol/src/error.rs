//! Error types for the protocol crate.
//!
//! Every failure the codec, the stream assembler and the client can report is
//! a variant of [`ProtocolError`]. Variants carry their context as named
//! fields; [`ProtocolError::kind`] gives the bare classification.

use std::io;

use serde::Serialize;
use thiserror::Error;

/// Protocol error type covering all possible failure modes.
///
/// The type is `Clone` so that a single failure can be delivered both to the
/// event channel and to the caller awaiting a response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    // Connection errors
    /// The TCP connection could not be established.
    #[error("connection to {addr} failed: {message}")]
    ConnectionError {
        /// Address the client tried to reach.
        addr: String,
        /// Underlying I/O error kind (e.g. `ConnectionRefused`).
        kind: io::ErrorKind,
        /// Human-readable cause.
        message: String,
    },

    /// The TCP connection was not established before the deadline.
    #[error("connection to {addr} timed out after {timeout_ms} ms")]
    ConnectTimeout {
        /// Address the client tried to reach.
        addr: String,
        /// The deadline that elapsed.
        timeout_ms: u64,
    },

    /// `disconnect` was called while the TCP connect was still in progress.
    #[error("connect cancelled by disconnect")]
    ConnectCancelled,

    /// `connect` was called while a connection is already open.
    #[error("already connected: disconnect before connecting again")]
    AlreadyConnected,

    /// A command was attempted without an open connection.
    #[error("not connected: cannot send a command without an open connection")]
    NotConnected,

    /// DUMP was attempted before any command had been dispatched.
    #[error("HELLO required: DUMP cannot be sent before the handshake")]
    HelloRequired,

    /// A command was attempted while another one awaits its response.
    #[error("{command} (nonce {nonce}) is still awaiting a response")]
    CommandInFlight {
        /// Name of the outstanding command.
        command: &'static str,
        /// Nonce the outstanding command was sent with.
        nonce: u32,
    },

    /// A read or write on an established connection failed.
    #[error("transport error: {0}")]
    Transport(String),

    // Frame errors
    /// Payload exceeds the maximum encodable size.
    #[error("payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge {
        /// Actual payload size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Wire bytes are structurally invalid.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The Base64 region of an envelope could not be decoded.
    #[error("invalid base64: {0}")]
    InvalidBase64(String),

    /// The stored integrity hash does not match the recomputed one.
    #[error("hash validation failed for command {command:#04x} (nonce {nonce})")]
    HashValidationFailure {
        /// Command byte of the rejected frame.
        command: u8,
        /// Nonce of the rejected frame.
        nonce: u32,
    },

    // Sequencing errors
    /// A response carried a nonce other than the one expected.
    #[error("invalid nonce: expected {expected}, got {got}")]
    InvalidNonce {
        /// The nonce the client expected (`sent + 1`).
        expected: u32,
        /// The nonce the frame carried.
        got: u32,
    },

    /// A correctly sequenced frame that does not answer the outstanding command.
    #[error("unexpected response {command:#04x} (nonce {nonce})")]
    UnexpectedResponse {
        /// Command byte of the unexpected frame.
        command: u8,
        /// Nonce of the unexpected frame.
        nonce: u32,
    },

    /// The transport closed while a command awaited its response.
    #[error("connection closed while a command was awaiting its response")]
    UnexpectedDisconnection,

    /// No response arrived within the configured response timeout.
    #[error("{command} (nonce {nonce}) got no response within {timeout_ms} ms")]
    ResponseTimeout {
        /// Name of the command that timed out.
        command: &'static str,
        /// Nonce the command was sent with.
        nonce: u32,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// The pending command was dropped by a caller-initiated disconnect.
    #[error("command cancelled by disconnect")]
    ExchangeCancelled,
}

/// Classification of a [`ProtocolError`] without its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ProtocolErrorKind {
    /// See [`ProtocolError::ConnectionError`].
    ConnectionError,
    /// See [`ProtocolError::ConnectTimeout`].
    ConnectTimeout,
    /// See [`ProtocolError::ConnectCancelled`].
    ConnectCancelled,
    /// See [`ProtocolError::AlreadyConnected`].
    AlreadyConnected,
    /// See [`ProtocolError::NotConnected`].
    NotConnected,
    /// See [`ProtocolError::HelloRequired`].
    HelloRequired,
    /// See [`ProtocolError::CommandInFlight`].
    CommandInFlight,
    /// See [`ProtocolError::Transport`].
    Transport,
    /// See [`ProtocolError::PayloadTooLarge`].
    PayloadTooLarge,
    /// See [`ProtocolError::MalformedFrame`].
    MalformedFrame,
    /// See [`ProtocolError::InvalidBase64`].
    InvalidBase64,
    /// See [`ProtocolError::HashValidationFailure`].
    HashValidationFailure,
    /// See [`ProtocolError::InvalidNonce`].
    InvalidNonce,
    /// See [`ProtocolError::UnexpectedResponse`].
    UnexpectedResponse,
    /// See [`ProtocolError::UnexpectedDisconnection`].
    UnexpectedDisconnection,
    /// See [`ProtocolError::ResponseTimeout`].
    ResponseTimeout,
    /// See [`ProtocolError::ExchangeCancelled`].
    ExchangeCancelled,
}

impl ProtocolError {
    /// Returns the classification tag of this error.
    pub fn kind(&self) -> ProtocolErrorKind {
        match self {
            ProtocolError::ConnectionError { .. } => ProtocolErrorKind::ConnectionError,
            ProtocolError::ConnectTimeout { .. } => ProtocolErrorKind::ConnectTimeout,
            ProtocolError::ConnectCancelled => ProtocolErrorKind::ConnectCancelled,
            ProtocolError::AlreadyConnected => ProtocolErrorKind::AlreadyConnected,
            ProtocolError::NotConnected => ProtocolErrorKind::NotConnected,
            ProtocolError::HelloRequired => ProtocolErrorKind::HelloRequired,
            ProtocolError::CommandInFlight { .. } => ProtocolErrorKind::CommandInFlight,
            ProtocolError::Transport(_) => ProtocolErrorKind::Transport,
            ProtocolError::PayloadTooLarge { .. } => ProtocolErrorKind::PayloadTooLarge,
            ProtocolError::MalformedFrame(_) => ProtocolErrorKind::MalformedFrame,
            ProtocolError::InvalidBase64(_) => ProtocolErrorKind::InvalidBase64,
            ProtocolError::HashValidationFailure { .. } => {
                ProtocolErrorKind::HashValidationFailure
            }
            ProtocolError::InvalidNonce { .. } => ProtocolErrorKind::InvalidNonce,
            ProtocolError::UnexpectedResponse { .. } => ProtocolErrorKind::UnexpectedResponse,
            ProtocolError::UnexpectedDisconnection => ProtocolErrorKind::UnexpectedDisconnection,
            ProtocolError::ResponseTimeout { .. } => ProtocolErrorKind::ResponseTimeout,
            ProtocolError::ExchangeCancelled => ProtocolErrorKind::ExchangeCancelled,
        }
    }

    /// Returns `true` for errors caused by bytes the peer put on the wire.
    ///
    /// These are fatal to the connection that carried them.
    pub fn is_wire_violation(&self) -> bool {
        matches!(
            self.kind(),
            ProtocolErrorKind::MalformedFrame
                | ProtocolErrorKind::InvalidBase64
                | ProtocolErrorKind::HashValidationFailure
                | ProtocolErrorKind::InvalidNonce
                | ProtocolErrorKind::UnexpectedResponse
        )
    }

    /// Builds a [`ProtocolError::ConnectionError`] from a failed connect attempt.
    pub fn connection(addr: impl Into<String>, err: &io::Error) -> Self {
        ProtocolError::ConnectionError {
            addr: addr.into(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<base64::DecodeError> for ProtocolError {
    fn from(err: base64::DecodeError) -> Self {
        ProtocolError::InvalidBase64(err.to_string())
    }
}

impl From<io::Error> for ProtocolError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => ProtocolError::UnexpectedDisconnection,
            _ => ProtocolError::Transport(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_too_large_display() {
        let err = ProtocolError::PayloadTooLarge {
            size: 65536,
            max: 65535,
        };
        assert_eq!(
            err.to_string(),
            "payload too large: 65536 bytes exceeds maximum of 65535 bytes"
        );
    }

    #[test]
    fn test_invalid_nonce_display() {
        let err = ProtocolError::InvalidNonce {
            expected: 1,
            got: 999,
        };
        assert_eq!(err.to_string(), "invalid nonce: expected 1, got 999");
    }

    #[test]
    fn test_hash_failure_display() {
        let err = ProtocolError::HashValidationFailure {
            command: 0x83,
            nonce: 5,
        };
        assert_eq!(
            err.to_string(),
            "hash validation failed for command 0x83 (nonce 5)"
        );
    }

    #[test]
    fn test_command_in_flight_display() {
        let err = ProtocolError::CommandInFlight {
            command: "DUMP",
            nonce: 2,
        };
        assert_eq!(err.to_string(), "DUMP (nonce 2) is still awaiting a response");
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(
            ProtocolError::HelloRequired.kind(),
            ProtocolErrorKind::HelloRequired
        );
        assert_eq!(
            ProtocolError::ConnectCancelled.kind(),
            ProtocolErrorKind::ConnectCancelled
        );
        assert_eq!(
            ProtocolError::MalformedFrame("short".into()).kind(),
            ProtocolErrorKind::MalformedFrame
        );
        assert_eq!(
            ProtocolError::ConnectTimeout {
                addr: "127.0.0.1:1".into(),
                timeout_ms: 2000
            }
            .kind(),
            ProtocolErrorKind::ConnectTimeout
        );
    }

    #[test]
    fn test_wire_violations() {
        assert!(ProtocolError::InvalidBase64("bad".into()).is_wire_violation());
        assert!(ProtocolError::InvalidNonce {
            expected: 1,
            got: 2
        }
        .is_wire_violation());
        assert!(!ProtocolError::NotConnected.is_wire_violation());
        assert!(!ProtocolError::UnexpectedDisconnection.is_wire_violation());
    }

    #[test]
    fn test_from_io_error_connection_closed() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let err: ProtocolError = io_err.into();
        assert_eq!(err, ProtocolError::UnexpectedDisconnection);
    }

    #[test]
    fn test_from_io_error_other() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err: ProtocolError = io_err.into();
        assert!(matches!(err, ProtocolError::Transport(_)));
    }

    #[test]
    fn test_connection_error_keeps_kind() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = ProtocolError::connection("127.0.0.1:7321", &io_err);
        match err {
            ProtocolError::ConnectionError { addr, kind, .. } => {
                assert_eq!(addr, "127.0.0.1:7321");
                assert_eq!(kind, io::ErrorKind::ConnectionRefused);
            }
            other => panic!("expected ConnectionError, got {other:?}"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProtocolError>();
    }
}
