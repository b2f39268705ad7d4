//! Events emitted by the client for recorders, UIs and retry policies.

use std::time::SystemTime;

use minitel_protocol::{Frame, ProtocolError};
use serde::{Serialize, Serializer};

/// Buffer size for the event broadcast channel.
pub(crate) const EVENT_BUFFER_SIZE: usize = 64;

/// Which way a frame travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Client to server.
    Outgoing,
    /// Server to client.
    Incoming,
}

/// Notifications published on [`crate::MiniTelClient::subscribe`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientEvent {
    /// The TCP connection is established.
    Connected,
    /// The TCP connection closed, for any reason.
    Disconnected,
    /// A protocol or transport error occurred.
    Error(#[serde(serialize_with = "serialize_error")] ProtocolError),
    /// A frame was written or accepted.
    ///
    /// Carries only the payload size so that observers stay cheap.
    FrameTransmitted {
        /// Which way the frame travelled.
        direction: Direction,
        /// Protocol name of the command, e.g. `"DUMP_OK"`.
        command: &'static str,
        /// Nonce carried by the frame.
        nonce: u32,
        /// Payload length in bytes.
        payload_size: usize,
        /// When the frame was written or accepted.
        timestamp: SystemTime,
    },
    /// A response passed decoding, hash and nonce validation.
    FrameReceived(Frame),
}

fn serialize_error<S: Serializer>(err: &ProtocolError, serializer: S) -> Result<S::Ok, S::Error> {
    #[derive(Serialize)]
    struct ErrorView {
        kind: minitel_protocol::ProtocolErrorKind,
        message: String,
    }

    ErrorView {
        kind: err.kind(),
        message: err.to_string(),
    }
    .serialize(serializer)
}
