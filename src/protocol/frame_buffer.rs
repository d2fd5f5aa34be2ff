//! Frame buffer for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for zero-copy buffer management.
//! Implements a state machine for handling fragmented frames:
//! - `WaitingForPrefix`: Need at least 4 bytes
//! - `WaitingForBody`: Prefix parsed, need N more body bytes
//!
//! A single push may complete zero, one or many frames; a frame may span any
//! number of pushes.
//!
//! # Example
//!
//! ```
//! use ponche_gateway::protocol::{build_frame, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//! let bytes = build_frame(b"hello");
//!
//! assert!(buffer.push(&bytes[..3]).unwrap().is_empty());
//! let bodies = buffer.push(&bytes[3..]).unwrap();
//! assert_eq!(&bodies[0][..], b"hello");
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{
    decode_length_prefix, validate_length, DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE,
};
use crate::error::ChannelError;

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for a complete length prefix (need 4 bytes).
    WaitingForPrefix,
    /// Prefix parsed, waiting for body bytes.
    WaitingForBody { remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete frame bodies.
pub struct FrameBuffer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed body size.
    max_frame_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max body: 16MB.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom body size bound.
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForPrefix,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete frame bodies.
    ///
    /// Partial data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Malformed`] if a declared length exceeds the
    /// bound. The buffer should be discarded afterwards.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>, ChannelError> {
        self.buffer.extend_from_slice(data);

        let mut bodies = Vec::new();
        while let Some(body) = self.try_extract_one()? {
            bodies.push(body);
        }

        Ok(bodies)
    }

    /// Try to extract a single body from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(body))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a framing violation
    fn try_extract_one(&mut self) -> Result<Option<Bytes>, ChannelError> {
        match self.state {
            State::WaitingForPrefix => {
                let Some(len) = decode_length_prefix(&self.buffer) else {
                    return Ok(None);
                };
                validate_length(len, self.max_frame_size)?;

                let _ = self.buffer.split_to(LENGTH_PREFIX_SIZE);

                if len == 0 {
                    return Ok(Some(Bytes::new()));
                }

                self.state = State::WaitingForBody { remaining: len };
                self.try_extract_one()
            }

            State::WaitingForBody { remaining } => {
                let remaining = remaining as usize;
                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let body = self.buffer.split_to(remaining).freeze();
                self.state = State::WaitingForPrefix;
                Ok(Some(body))
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// True when a frame has been started but not completed.
    ///
    /// Used to tell a clean EOF from one in the middle of a frame.
    pub fn has_partial_frame(&self) -> bool {
        !self.buffer.is_empty() || matches!(self.state, State::WaitingForBody { .. })
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForPrefix;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForPrefix => "WaitingForPrefix",
            State::WaitingForBody { .. } => "WaitingForBody",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::build_frame;

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let bodies = buffer.push(&build_frame(b"hello")).unwrap();

        assert_eq!(bodies.len(), 1);
        assert_eq!(&bodies[0][..], b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_two_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();

        let mut combined = build_frame(b"first");
        combined.extend_from_slice(&build_frame(b"second"));

        let bodies = buffer.push(&combined).unwrap();

        assert_eq!(bodies.len(), 2);
        assert_eq!(&bodies[0][..], b"first");
        assert_eq!(&bodies[1][..], b"second");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_frame_split_across_three_chunks() {
        let mut buffer = FrameBuffer::new();
        let frame = build_frame(b"a body split at arbitrary points");

        // Cut inside the prefix and inside the body.
        let a = buffer.push(&frame[..2]).unwrap();
        let b = buffer.push(&frame[2..13]).unwrap();
        let c = buffer.push(&frame[13..]).unwrap();

        assert!(a.is_empty());
        assert!(b.is_empty());
        assert_eq!(c.len(), 1);
        assert_eq!(&c[0][..], b"a body split at arbitrary points");
    }

    #[test]
    fn test_fragmented_prefix() {
        let mut buffer = FrameBuffer::new();
        let frame = build_frame(b"test");

        assert!(buffer.push(&frame[..3]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForPrefix");

        let bodies = buffer.push(&frame[3..]).unwrap();
        assert_eq!(bodies.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_body() {
        let mut buffer = FrameBuffer::new();
        let body = b"this is a longer body that will be fragmented";
        let frame = build_frame(body);

        let partial = LENGTH_PREFIX_SIZE + 10;
        assert!(buffer.push(&frame[..partial]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForBody");
        assert!(buffer.has_partial_frame());

        let bodies = buffer.push(&frame[partial..]).unwrap();
        assert_eq!(&bodies[0][..], body);
        assert!(!buffer.has_partial_frame());
    }

    #[test]
    fn test_empty_body() {
        let mut buffer = FrameBuffer::new();
        let bodies = buffer.push(&build_frame(b"")).unwrap();

        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].is_empty());
    }

    #[test]
    fn test_max_frame_size_validation() {
        let mut buffer = FrameBuffer::with_max_frame_size(100);

        let result = buffer.push(&1000u32.to_be_bytes());

        assert!(matches!(result, Err(ChannelError::Malformed(_))));
    }

    #[test]
    fn test_mixed_complete_and_partial() {
        let mut buffer = FrameBuffer::new();
        let second = build_frame(b"second");

        let mut data = build_frame(b"first");
        data.extend_from_slice(&second[..5]);

        let bodies = buffer.push(&data).unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(&bodies[0][..], b"first");
        assert_eq!(buffer.state_name(), "WaitingForBody");

        let bodies = buffer.push(&second[5..]).unwrap();
        assert_eq!(&bodies[0][..], b"second");
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let frame = build_frame(b"hi");

        let mut all = Vec::new();
        for byte in &frame {
            all.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all.len(), 1);
        assert_eq!(&all[0][..], b"hi");
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = FrameBuffer::new();
        let frame = build_frame(b"test");

        buffer.push(&frame[..LENGTH_PREFIX_SIZE]).unwrap();
        assert_eq!(buffer.state_name(), "WaitingForBody");

        buffer.clear();

        assert_eq!(buffer.state_name(), "WaitingForPrefix");
        assert!(buffer.is_empty());
        assert!(!buffer.has_partial_frame());
    }
}
