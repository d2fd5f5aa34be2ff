//! Frame construction.
//!
//! Builds the on-wire representation of a body: length prefix followed by
//! the body bytes. The inbound side never materializes a frame struct;
//! [`FrameBuffer`](super::FrameBuffer) hands out bodies directly.
//!
//! # Example
//!
//! ```
//! use ponche_gateway::protocol::{build_frame, LENGTH_PREFIX_SIZE};
//!
//! let bytes = build_frame(b"hello");
//! assert_eq!(bytes.len(), LENGTH_PREFIX_SIZE + 5);
//! assert_eq!(&bytes[..4], &[0, 0, 0, 5]);
//! ```

use super::wire_format::{encode_length_prefix, LENGTH_PREFIX_SIZE};

/// Build a complete frame as a single byte vector.
pub fn build_frame(body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    buf.extend_from_slice(&encode_length_prefix(body.len() as u32));
    buf.extend_from_slice(body);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameBuffer;

    #[test]
    fn test_build_frame_empty_body() {
        let bytes = build_frame(b"");
        assert_eq!(bytes, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_build_frame_parses_back() {
        let bytes = build_frame(b"0123456789");

        let mut buffer = FrameBuffer::new();
        let bodies = buffer.push(&bytes).unwrap();

        assert_eq!(bodies.len(), 1);
        assert_eq!(&bodies[0][..], b"0123456789");
    }
}
