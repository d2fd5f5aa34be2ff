//! Protocol module - framing and wire records.
//!
//! This module implements the data-plane protocol:
//! - 4-byte length prefix encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Request/response records carried inside frame bodies

mod frame;
mod frame_buffer;
mod message;
mod wire_format;

pub use frame::build_frame;
pub use frame_buffer::FrameBuffer;
pub use message::{CorrelationId, WireRequest, WireResponse};
pub use wire_format::{
    decode_length_prefix, encode_length_prefix, validate_length, ABSOLUTE_MAX_FRAME_SIZE,
    DEFAULT_MAX_FRAME_SIZE, LENGTH_PREFIX_SIZE,
};
