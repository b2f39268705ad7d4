//! Frame codec for the MiniTel-Lite v3.0 wire format.
//!
//! # Frame Format
//!
//! A frame travels inside an envelope:
//! - 2 bytes: length of the Base64 text that follows (big-endian)
//! - N bytes: Base64 (standard alphabet, padded) of the binary frame
//!
//! The binary frame consists of:
//! - 1 byte: command
//! - 4 bytes: nonce (big-endian)
//! - 0..=65535 bytes: payload
//! - 32 bytes: SHA-256 over `command ‖ nonce ‖ payload`
//!
//! # Integrity
//!
//! The hash covers the binary content, not the Base64 text, and is verified
//! on every decode. A frame that fails verification is never returned.

use std::borrow::Cow;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::commands::Command;
use crate::error::{ProtocolError, Result};

/// Maximum payload length accepted by the protocol.
pub const MAX_PAYLOAD_SIZE: usize = 65535;

/// Length of the SHA-256 integrity hash.
pub const HASH_LENGTH: usize = 32;

/// Size of the envelope length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Smallest valid binary frame: command + nonce + hash, empty payload.
pub const MIN_FRAME_SIZE: usize = 1 + 4 + HASH_LENGTH;

/// Largest Base64 section the 2-byte prefix can describe.
pub const MAX_ENVELOPE_BODY: usize = u16::MAX as usize;

/// Largest payload whose envelope still fits the 2-byte length prefix.
///
/// Base64 expands 3 bytes into 4, so a 65535-byte Base64 body carries at
/// most 49149 binary bytes, 37 of which are frame overhead.
pub const MAX_ENCODABLE_PAYLOAD: usize = (MAX_ENVELOPE_BODY / 4) * 3 - MIN_FRAME_SIZE;

/// A decoded, hash-verified protocol frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Command byte. Not necessarily a known [`Command`].
    pub command: u8,
    /// Sequence number of this frame.
    pub nonce: u32,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// SHA-256 over `command ‖ nonce ‖ payload`.
    pub integrity_hash: [u8; HASH_LENGTH],
}

impl Frame {
    /// Create a frame, computing its integrity hash.
    pub fn new(command: u8, nonce: u32, payload: Vec<u8>) -> Result<Self> {
        check_payload_size(payload.len())?;
        let integrity_hash = compute_hash(command, nonce, &payload);
        Ok(Self {
            command,
            nonce,
            payload,
            integrity_hash,
        })
    }

    /// The command as a known protocol code, if it is one.
    pub fn known_command(&self) -> Option<Command> {
        Command::from_code(self.command)
    }

    /// Payload viewed as text. Invalid UTF-8 sequences are replaced.
    pub fn payload_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Encode this frame into its wire envelope.
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        encode(self.command, self.nonce, &self.payload)
    }
}

/// Computes the integrity hash of a frame's content.
pub fn compute_hash(command: u8, nonce: u32, payload: &[u8]) -> [u8; HASH_LENGTH] {
    let mut hasher = Sha256::new();
    hasher.update([command]);
    hasher.update(nonce.to_be_bytes());
    hasher.update(payload);
    hasher.finalize().into()
}

fn check_payload_size(size: usize) -> Result<()> {
    if size > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    // The protocol limit is larger than what the length prefix can carry.
    if size > MAX_ENCODABLE_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge {
            size,
            max: MAX_ENCODABLE_PAYLOAD,
        });
    }
    Ok(())
}

/// Encode a frame into a wire envelope.
///
/// The command byte is not validated; any value is framed as given.
pub fn encode(command: u8, nonce: u32, payload: &[u8]) -> Result<Vec<u8>> {
    check_payload_size(payload.len())?;

    let mut binary = Vec::with_capacity(MIN_FRAME_SIZE + payload.len());
    binary.push(command);
    binary.extend_from_slice(&nonce.to_be_bytes());
    binary.extend_from_slice(payload);
    binary.extend_from_slice(&compute_hash(command, nonce, payload));

    let body = BASE64.encode(&binary);
    let body_len = u16::try_from(body.len()).map_err(|_| ProtocolError::PayloadTooLarge {
        size: payload.len(),
        max: MAX_ENCODABLE_PAYLOAD,
    })?;

    let mut output = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    output.extend_from_slice(&body_len.to_be_bytes());
    output.extend_from_slice(body.as_bytes());
    Ok(output)
}

/// Total envelope size announced by the length prefix at the start of `data`.
///
/// Returns `None` while fewer than two bytes are available.
pub fn envelope_len(data: &[u8]) -> Option<usize> {
    match data {
        [hi, lo, ..] => Some(LENGTH_PREFIX_SIZE + u16::from_be_bytes([*hi, *lo]) as usize),
        _ => None,
    }
}

/// Decode one frame from the start of `data`.
///
/// Bytes after the declared envelope are ignored.
pub fn decode(data: &[u8]) -> Result<Frame> {
    let total = envelope_len(data).ok_or_else(|| {
        ProtocolError::MalformedFrame(format!(
            "insufficient data for length prefix: need {} bytes, have {}",
            LENGTH_PREFIX_SIZE,
            data.len()
        ))
    })?;

    if data.len() < total {
        return Err(ProtocolError::MalformedFrame(format!(
            "declared length {} exceeds the {} bytes available",
            total - LENGTH_PREFIX_SIZE,
            data.len() - LENGTH_PREFIX_SIZE
        )));
    }

    let binary = BASE64.decode(&data[LENGTH_PREFIX_SIZE..total])?;

    if binary.len() < MIN_FRAME_SIZE {
        return Err(ProtocolError::MalformedFrame(format!(
            "binary frame too short: need at least {} bytes, have {}",
            MIN_FRAME_SIZE,
            binary.len()
        )));
    }

    let command = binary[0];
    let nonce = u32::from_be_bytes([binary[1], binary[2], binary[3], binary[4]]);
    let hash_start = binary.len() - HASH_LENGTH;
    let payload = binary[5..hash_start].to_vec();

    let mut integrity_hash = [0u8; HASH_LENGTH];
    integrity_hash.copy_from_slice(&binary[hash_start..]);

    if compute_hash(command, nonce, &payload) != integrity_hash {
        return Err(ProtocolError::HashValidationFailure { command, nonce });
    }

    Ok(Frame {
        command,
        nonce,
        payload,
        integrity_hash,
    })
}
