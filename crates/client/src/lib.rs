//! # MiniTel Client Library
//!
//! Async client for the MiniTel-Lite v3.0 protocol.
//!
//! ## Overview
//!
//! - **Connection state machine**: [`MiniTelClient`] connects over TCP,
//!   sends HELLO, DUMP and STOP one at a time and validates every response
//! - **Events**: every connection change, frame and error is published as a
//!   [`ClientEvent`] on a broadcast channel
//! - **Configuration**: TOML configuration with environment overrides
//!
//! Framing, hashing and stream reassembly live in `minitel_protocol`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use minitel_client::{MiniTelClient, DEFAULT_CONNECT_TIMEOUT};
//! use minitel_protocol::Command;
//!
//! # async fn example() -> minitel_protocol::Result<()> {
//! let client = MiniTelClient::new();
//! client.connect("127.0.0.1", 7321, DEFAULT_CONNECT_TIMEOUT).await?;
//!
//! client.send_hello().await?;
//! let response = client.send_dump().await?;
//! if response.known_command() == Some(Command::DumpOk) {
//!     println!("{}", response.payload_text());
//! }
//!
//! client.send_stop().await?;
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod events;

pub use client::{
    ClientSnapshot, ConnectionState, MiniTelClient, DEFAULT_CONNECT_TIMEOUT, NONCE_STEP,
};
pub use config::{Config, ConfigError};
pub use events::{ClientEvent, Direction};
