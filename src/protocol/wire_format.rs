//! Wire format encoding and decoding.
//!
//! Every frame is a body preceded by its length:
//! ```text
//! ┌──────────────┬──────────────────────┐
//! │ Body length  │ Body                 │
//! │ 4 bytes      │ N bytes              │
//! │ uint32 BE    │ codec-encoded record │
//! └──────────────┴──────────────────────┘
//! ```
//!
//! The length is Big Endian and counts only the body.

use crate::error::ChannelError;

/// Length prefix size in bytes (fixed, exactly 4).
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum frame body size (16 MB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Absolute maximum frame body size (~2 GB, max i32).
pub const ABSOLUTE_MAX_FRAME_SIZE: u32 = 2_147_483_647;

/// Encode a body length as a Big Endian prefix.
///
/// # Example
///
/// ```
/// use ponche_gateway::protocol::encode_length_prefix;
///
/// assert_eq!(encode_length_prefix(258), [0, 0, 1, 2]);
/// ```
#[inline]
pub fn encode_length_prefix(len: u32) -> [u8; LENGTH_PREFIX_SIZE] {
    len.to_be_bytes()
}

/// Decode a length prefix from the start of `buf`.
///
/// Returns `None` if the buffer is too short.
#[inline]
pub fn decode_length_prefix(buf: &[u8]) -> Option<u32> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return None;
    }
    Some(u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

/// Check a declared body length against the configured bound, itself
/// capped at [`ABSOLUTE_MAX_FRAME_SIZE`].
pub fn validate_length(len: u32, max_frame_size: u32) -> Result<(), ChannelError> {
    let limit = max_frame_size.min(ABSOLUTE_MAX_FRAME_SIZE);
    if len > limit {
        return Err(ChannelError::Malformed(format!(
            "Frame size {} exceeds maximum {}",
            len, limit
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_big_endian_byte_order() {
        let bytes = encode_length_prefix(0x0102_0304);
        assert_eq!(bytes, [0x01, 0x02, 0x03, 0x04]);
        assert_eq!(decode_length_prefix(&bytes), Some(0x0102_0304));
    }

    #[test]
    fn test_decode_too_short_buffer() {
        assert!(decode_length_prefix(&[0, 0, 1]).is_none());
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        assert_eq!(decode_length_prefix(&[0, 0, 0, 5, 0xAA, 0xBB]), Some(5));
    }

    #[test]
    fn test_validate_length() {
        assert!(validate_length(100, 100).is_ok());
        assert!(validate_length(0, 100).is_ok());

        let err = validate_length(101, 100).unwrap_err();
        assert!(matches!(err, ChannelError::Malformed(_)));
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_validate_length_absolute_cap() {
        assert!(validate_length(ABSOLUTE_MAX_FRAME_SIZE, u32::MAX).is_ok());
        assert!(validate_length(ABSOLUTE_MAX_FRAME_SIZE + 1, u32::MAX).is_err());
    }
}
