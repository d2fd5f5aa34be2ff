//! Inbound half of the framed channel.

use std::collections::VecDeque;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::DEFAULT_READ_BUFFER_SIZE;
use crate::error::ChannelError;
use crate::protocol::{FrameBuffer, DEFAULT_MAX_FRAME_SIZE};

/// Reads discrete messages from a byte stream.
///
/// Owned by exactly one task. Bodies completed by the same underlying read
/// are queued and handed out one per call, in order.
pub struct FramedReader<R> {
    reader: R,
    frames: FrameBuffer,
    ready: VecDeque<Bytes>,
    buf: Vec<u8>,
    /// Set on the first error; every later call returns it.
    failed: Option<ChannelError>,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    /// Wrap a stream with default limits.
    pub fn new(reader: R) -> Self {
        Self::with_limits(reader, DEFAULT_MAX_FRAME_SIZE, DEFAULT_READ_BUFFER_SIZE)
    }

    /// Wrap a stream with an explicit frame size bound and read size.
    pub fn with_limits(reader: R, max_frame_size: u32, read_buffer_size: usize) -> Self {
        Self {
            reader,
            frames: FrameBuffer::with_max_frame_size(max_frame_size),
            ready: VecDeque::new(),
            buf: vec![0u8; read_buffer_size.max(1)],
            failed: None,
        }
    }

    /// Suspend until a complete frame is available and return its body.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::Closed`] on EOF (clean, or mid-frame)
    /// - [`ChannelError::Malformed`] when a declared length is out of bounds
    /// - [`ChannelError::IoFailure`] on a transport fault
    pub async fn read_message(&mut self) -> Result<Bytes, ChannelError> {
        loop {
            if let Some(body) = self.ready.pop_front() {
                return Ok(body);
            }
            if let Some(err) = &self.failed {
                return Err(err.clone());
            }

            let n = match self.reader.read(&mut self.buf).await {
                Ok(0) => {
                    if self.frames.has_partial_frame() {
                        tracing::warn!(
                            buffered = self.frames.len(),
                            "stream ended in the middle of a frame"
                        );
                    }
                    return Err(self.fail(ChannelError::Closed));
                }
                Ok(n) => n,
                Err(e) => return Err(self.fail(e.into())),
            };

            match self.frames.push(&self.buf[..n]) {
                Ok(bodies) => self.ready.extend(bodies),
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    fn fail(&mut self, err: ChannelError) -> ChannelError {
        self.frames.clear();
        self.failed = Some(err.clone());
        err
    }
}
