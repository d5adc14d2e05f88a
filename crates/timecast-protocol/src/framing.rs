//! Length-prefixed message framing.
//!
//! Frames carry a 4-byte big-endian length prefix followed by the codec
//! body:
//!
//! ```text
//! +----------------+------------------+
//! | length (4 BE)  |  codec body      |
//! +----------------+------------------+
//! ```
//!
//! [`FrameDecoder`] does no IO of its own. Callers push whatever a socket
//! read returned and pop complete frames, so a frame split across any number
//! of reads is reassembled before anyone tries to decode it.

use crate::error::{ProtocolError, ProtocolResult};

/// Size of the length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Prefixes `body` with its length.
///
/// # Example
///
/// ```rust
/// use timecast_protocol::encode_frame;
///
/// let frame = encode_frame(b"hello", 1024).unwrap();
/// assert_eq!(&frame[..4], &[0, 0, 0, 5]);
/// assert_eq!(&frame[4..], b"hello");
/// ```
pub fn encode_frame(body: &[u8], max_frame_size: usize) -> ProtocolResult<Vec<u8>> {
    if body.is_empty() {
        return Err(ProtocolError::EmptyFrame);
    }
    if body.len() > max_frame_size || body.len() > u32::MAX as usize {
        return Err(ProtocolError::FrameTooLarge {
            size: body.len(),
            max: max_frame_size,
        });
    }

    let len = body.len() as u32;
    let mut buffer = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    buffer.extend_from_slice(&len.to_be_bytes());
    buffer.extend_from_slice(body);
    Ok(buffer)
}

/// Reassembles frames from arbitrarily split byte chunks.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Creates a decoder rejecting frames larger than `max_frame_size`.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_size,
        }
    }

    /// Appends bytes read from the stream.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes waiting for a frame to complete.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pops the next complete frame body, if one is buffered.
    ///
    /// An oversized or empty length prefix is reported as soon as the
    /// header is seen, without waiting for the body.
    pub fn next_frame(&mut self) -> ProtocolResult<Option<Vec<u8>>> {
        if self.buffer.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let mut len_bytes = [0u8; FRAME_HEADER_LEN];
        len_bytes.copy_from_slice(&self.buffer[..FRAME_HEADER_LEN]);
        let len = u32::from_be_bytes(len_bytes) as usize;

        if len == 0 {
            return Err(ProtocolError::EmptyFrame);
        }
        if len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }

        let total = FRAME_HEADER_LEN + len;
        if self.buffer.len() < total {
            return Ok(None);
        }

        let body = self.buffer[FRAME_HEADER_LEN..total].to_vec();
        self.buffer.drain(..total);
        Ok(Some(body))
    }

    /// Checks the stream ended on a frame boundary.
    pub fn finish(&self) -> ProtocolResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let expected = if self.buffer.len() < FRAME_HEADER_LEN {
            FRAME_HEADER_LEN
        } else {
            let mut len_bytes = [0u8; FRAME_HEADER_LEN];
            len_bytes.copy_from_slice(&self.buffer[..FRAME_HEADER_LEN]);
            FRAME_HEADER_LEN + u32::from_be_bytes(len_bytes) as usize
        };

        Err(ProtocolError::IncompleteFrame {
            expected,
            received: self.buffer.len(),
        })
    }
}
