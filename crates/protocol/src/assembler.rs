//! Stream reassembly of wire envelopes.
//!
//! TCP delivers bytes without message boundaries: one read may hold half an
//! envelope, or several. [`StreamAssembler`] buffers what has arrived and
//! hands out complete, decoded frames strictly front to back.
//!
//! # Example
//!
//! ```rust
//! use minitel_protocol::{encode, StreamAssembler};
//!
//! let wire = encode(0x81, 1, &[]).unwrap();
//! let (head, tail) = wire.split_at(5);
//!
//! let mut assembler = StreamAssembler::new();
//! assert_eq!(assembler.push(head).count(), 0);
//!
//! let frames: Vec<_> = assembler.push(tail).collect();
//! assert_eq!(frames.len(), 1);
//! assert_eq!(frames[0].as_ref().unwrap().nonce, 1);
//! ```

use bytes::BytesMut;

use crate::error::{ProtocolError, Result};
use crate::framing::{self, Frame};

/// Initial buffer capacity; one maximal envelope.
const INITIAL_CAPACITY: usize = 64 * 1024;

/// Incremental envelope reassembler.
///
/// A decode failure poisons the assembler: every later extraction reports the
/// same failure. A corrupted stream is never resynchronised; create a new
/// assembler for a new connection.
#[derive(Debug)]
pub struct StreamAssembler {
    buffer: BytesMut,
    failure: Option<ProtocolError>,
}

impl Default for StreamAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_CAPACITY),
            failure: None,
        }
    }

    /// Append received bytes and iterate over the frames they complete.
    ///
    /// The iterator is lazy: frames are split off and decoded as it is
    /// advanced. It ends when the buffer holds no complete envelope, or right
    /// after yielding an error.
    pub fn push(&mut self, chunk: &[u8]) -> Frames<'_> {
        if self.failure.is_none() {
            self.buffer.extend_from_slice(chunk);
        }
        Frames {
            assembler: self,
            done: false,
        }
    }

    /// Extract the next complete frame from the buffer.
    ///
    /// Returns `Ok(None)` when more data is needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }

        let Some(total) = framing::envelope_len(&self.buffer) else {
            return Ok(None);
        };
        if self.buffer.len() < total {
            return Ok(None);
        }

        let envelope = self.buffer.split_to(total);
        match framing::decode(&envelope) {
            Ok(frame) => Ok(Some(frame)),
            Err(err) => {
                self.buffer.clear();
                self.failure = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Number of buffered bytes not yet consumed as a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Whether a decode failure has poisoned this assembler.
    pub fn is_poisoned(&self) -> bool {
        self.failure.is_some()
    }
}

/// Frames completed by one [`StreamAssembler::push`].
pub struct Frames<'a> {
    assembler: &'a mut StreamAssembler,
    done: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.assembler.next_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl std::iter::FusedIterator for Frames<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::encode;

    fn collect_ok(frames: Frames<'_>) -> Vec<Frame> {
        frames.map(|f| f.unwrap()).collect()
    }

    #[test]
    fn test_whole_envelope() {
        let wire = encode(0x81, 1, &[]).unwrap();
        let mut assembler = StreamAssembler::new();

        let frames = collect_ok(assembler.push(&wire));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].command, 0x81);
        assert_eq!(frames[0].nonce, 1);
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_split_at_every_offset() {
        let wire = encode(0x83, 5, b"SECRET_CODE_12345").unwrap();
        let whole = framing::decode(&wire).unwrap();

        for split in 0..=wire.len() {
            let mut assembler = StreamAssembler::new();
            let mut frames = collect_ok(assembler.push(&wire[..split]));
            if split < wire.len() {
                assert!(frames.is_empty(), "frame yielded early at split {split}");
            }
            frames.extend(collect_ok(assembler.push(&wire[split..])));
            assert_eq!(frames, vec![whole.clone()], "split {split}");
        }
    }

    #[test]
    fn test_byte_by_byte() {
        let wire = encode(0x84, 7, &[]).unwrap();
        let mut assembler = StreamAssembler::new();
        let mut frames = Vec::new();
        for byte in &wire {
            frames.extend(collect_ok(assembler.push(std::slice::from_ref(byte))));
        }
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].nonce, 7);
    }

    #[test]
    fn test_coalesced_envelopes_keep_order() {
        let mut chunk = encode(0x82, 3, &[]).unwrap();
        chunk.extend(encode(0x83, 5, b"SECRET").unwrap());

        let mut assembler = StreamAssembler::new();
        let frames = collect_ok(assembler.push(&chunk));
        assert_eq!(frames.len(), 2);
        assert_eq!((frames[0].command, frames[0].nonce), (0x82, 3));
        assert_eq!((frames[1].command, frames[1].nonce), (0x83, 5));
    }

    #[test]
    fn test_trailing_partial_envelope_stays_buffered() {
        let first = encode(0x81, 1, &[]).unwrap();
        let second = encode(0x84, 3, &[]).unwrap();
        let mut chunk = first.clone();
        chunk.extend_from_slice(&second[..10]);

        let mut assembler = StreamAssembler::new();
        assert_eq!(collect_ok(assembler.push(&chunk)).len(), 1);
        assert_eq!(assembler.buffered(), 10);

        let frames = collect_ok(assembler.push(&second[10..]));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].nonce, 3);
        assert_eq!(assembler.buffered(), 0);
    }

    #[test]
    fn test_single_length_byte_waits() {
        let mut assembler = StreamAssembler::new();
        assert_eq!(assembler.push(&[0x00]).count(), 0);
        assert_eq!(assembler.buffered(), 1);
    }

    #[test]
    fn test_decode_error_poisons_assembler() {
        let mut bad = vec![0x00, 0x08];
        bad.extend_from_slice(b"!!!!????");
        let good = encode(0x81, 1, &[]).unwrap();
        let mut chunk = bad;
        chunk.extend_from_slice(&good);

        let mut assembler = StreamAssembler::new();
        let results: Vec<_> = assembler.push(&chunk).collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(ProtocolError::InvalidBase64(_))));
        assert!(assembler.is_poisoned());

        // The valid envelope after the corruption is never recovered
        let results: Vec<_> = assembler.push(&good).collect();
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(ProtocolError::InvalidBase64(_))));
    }

    #[test]
    fn test_frames_before_error_are_yielded() {
        let mut chunk = encode(0x81, 1, &[]).unwrap();
        chunk.extend_from_slice(&[0x00, 0x00]);

        let mut assembler = StreamAssembler::new();
        let results: Vec<_> = assembler.push(&chunk).collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(ProtocolError::MalformedFrame(_))));
    }
}
