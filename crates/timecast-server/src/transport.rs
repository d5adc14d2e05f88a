//! Frame transport over a byte stream.
//!
//! [`FrameReader`] reads at most `read_size` bytes at a time and hands
//! back whole frame bodies; [`FrameWriter`] length-prefixes a body and
//! writes it in one go. They are split so a session can read and write
//! from different tasks.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use timecast_protocol::{FrameDecoder, ProtocolResult, encode_frame};

/// Reads length-prefixed frames from a stream.
pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
    chunk: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wraps `reader`, reading `read_size` bytes per call.
    pub fn new(reader: R, read_size: usize, max_frame_size: usize) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(max_frame_size),
            chunk: vec![0u8; read_size.max(1)],
        }
    }

    /// Returns the next frame body.
    ///
    /// Returns `Ok(None)` when the peer closed the stream on a frame
    /// boundary. EOF in the middle of a frame is an error.
    pub async fn read_frame(&mut self) -> ProtocolResult<Option<Vec<u8>>> {
        loop {
            if let Some(frame) = self.decoder.next_frame()? {
                return Ok(Some(frame));
            }

            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                self.decoder.finish()?;
                return Ok(None);
            }
            self.decoder.push(&self.chunk[..n]);
        }
    }
}

/// Writes length-prefixed frames to a stream.
pub struct FrameWriter<W> {
    writer: W,
    max_frame_size: usize,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Wraps `writer`, refusing bodies larger than `max_frame_size`.
    pub fn new(writer: W, max_frame_size: usize) -> Self {
        Self {
            writer,
            max_frame_size,
        }
    }

    /// Writes one frame and flushes it.
    pub async fn write_frame(&mut self, body: &[u8]) -> ProtocolResult<()> {
        let frame = encode_frame(body, self.max_frame_size)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Shuts down the write half.
    pub async fn shutdown(&mut self) -> ProtocolResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
