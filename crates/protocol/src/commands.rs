//! Command and response codes of MiniTel-Lite v3.0.

use serde::{Deserialize, Serialize};

/// Every command byte the protocol defines.
///
/// Requests have the high bit clear; server responses have it set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    /// Handshake request.
    Hello = 0x01,
    /// Request for the stored secret.
    Dump = 0x02,
    /// Graceful end of session.
    Stop = 0x03,
    /// Handshake acknowledgement.
    HelloAck = 0x81,
    /// The server refused to dump.
    DumpFailed = 0x82,
    /// The server dumped; the payload carries the secret.
    DumpOk = 0x83,
    /// Stop acknowledgement.
    StopOk = 0x84,
}

impl Command {
    /// Returns the wire byte of this command.
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Maps a wire byte to a known command.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Command::Hello),
            0x02 => Some(Command::Dump),
            0x03 => Some(Command::Stop),
            0x81 => Some(Command::HelloAck),
            0x82 => Some(Command::DumpFailed),
            0x83 => Some(Command::DumpOk),
            0x84 => Some(Command::StopOk),
            _ => None,
        }
    }

    /// Protocol name of the command, as used in logs and recordings.
    pub fn name(self) -> &'static str {
        match self {
            Command::Hello => "HELLO",
            Command::Dump => "DUMP",
            Command::Stop => "STOP",
            Command::HelloAck => "HELLO_ACK",
            Command::DumpFailed => "DUMP_FAILED",
            Command::DumpOk => "DUMP_OK",
            Command::StopOk => "STOP_OK",
        }
    }

    /// Returns `true` for client-to-server commands.
    #[inline]
    pub fn is_request(self) -> bool {
        self.code() & 0x80 == 0
    }

    /// Response codes that validly answer this request.
    ///
    /// DUMP has two: a refusal is a legitimate outcome, not a protocol error.
    /// Responses answer nothing and return an empty set.
    pub fn accepted_responses(self) -> &'static [Command] {
        match self {
            Command::Hello => &[Command::HelloAck],
            Command::Dump => &[Command::DumpFailed, Command::DumpOk],
            Command::Stop => &[Command::StopOk],
            _ => &[],
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Name for a raw command byte, tolerating unknown codes.
pub fn command_name(code: u8) -> &'static str {
    Command::from_code(code).map_or("UNKNOWN", Command::name)
}
