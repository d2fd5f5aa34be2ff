//! Codec module - serialization of frame bodies.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`, struct-as-map)
//! - [`JsonCodec`] - JSON using `serde_json`
//!
//! Both are self-describing, so the data-layer side can decode records
//! without a schema. [`WireCodec`] picks one at runtime from configuration.
//!
//! # Example
//!
//! ```
//! use ponche_gateway::codec::WireCodec;
//!
//! let codec = WireCodec::Json;
//! let encoded = codec.encode(&"hello").unwrap();
//! let decoded: String = codec.decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Body encoding used on the data plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireCodec {
    /// MessagePack (default).
    #[default]
    MsgPack,
    /// JSON.
    Json,
}

impl WireCodec {
    /// Encode a value with the selected codec.
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            WireCodec::MsgPack => MsgPackCodec::encode(value),
            WireCodec::Json => JsonCodec::encode(value),
        }
    }

    /// Decode bytes with the selected codec.
    pub fn decode<T: serde::de::DeserializeOwned>(self, bytes: &[u8]) -> Result<T, CodecError> {
        match self {
            WireCodec::MsgPack => MsgPackCodec::decode(bytes),
            WireCodec::Json => JsonCodec::decode(bytes),
        }
    }
}
