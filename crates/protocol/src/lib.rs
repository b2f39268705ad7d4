//! # MiniTel-Lite Protocol Library
//!
//! Wire format and stream handling for MiniTel-Lite v3.0, a small
//! request/response protocol carried over TCP.
//!
//! ## Overview
//!
//! - **Commands**: request and response codes (`HELLO`, `DUMP`, `STOP`, ...)
//! - **Frame Codec**: length-prefixed, Base64-wrapped, SHA-256 authenticated frames
//! - **Stream Assembler**: recovers frame boundaries from a TCP byte stream
//! - **Errors**: one error enum for codec, sequencing and connection failures
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │     cmd:u8 ‖ nonce:u32 ‖ payload        │  Frame content
//! ├─────────────────────────────────────────┤
//! │        ‖ sha256(content)                │  Integrity
//! ├─────────────────────────────────────────┤
//! │     u16 length ‖ Base64(binary frame)   │  Envelope
//! ├─────────────────────────────────────────┤
//! │                  TCP                    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use minitel_protocol::{decode, encode, Command};
//!
//! let wire = encode(Command::Hello.code(), 0, &[]).unwrap();
//! let frame = decode(&wire).unwrap();
//!
//! assert_eq!(frame.known_command(), Some(Command::Hello));
//! assert_eq!(frame.nonce, 0);
//! ```
//!
//! ## Modules
//!
//! - [`commands`]: command and response codes
//! - [`framing`]: envelope encoding and verified decoding
//! - [`assembler`]: incremental reassembly of envelopes
//! - [`error`]: error types

pub mod assembler;
pub mod commands;
pub mod error;
pub mod framing;

pub use assembler::{Frames, StreamAssembler};
pub use commands::{command_name, Command};
pub use error::{ProtocolError, ProtocolErrorKind, Result};
pub use framing::{
    compute_hash, decode, encode, envelope_len, Frame, HASH_LENGTH, LENGTH_PREFIX_SIZE,
    MAX_ENCODABLE_PAYLOAD, MAX_PAYLOAD_SIZE, MIN_FRAME_SIZE,
};
