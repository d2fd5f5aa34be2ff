//! MsgPack codec using `rmp-serde`.
//!
//! Structs are written as maps with `to_vec_named`, because the data layer
//! reads records by field name (`id`, `method`, `payload`).
//!
//! # Example
//!
//! ```
//! use ponche_gateway::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Swipe {
//!     user_id: String,
//!     outcome: bool,
//! }
//!
//! let swipe = Swipe { user_id: "1".to_string(), outcome: true };
//! let encoded = MsgPackCodec::encode(&swipe).unwrap();
//! let decoded: Swipe = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, swipe);
//! ```

use crate::error::CodecError;

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{WireRequest, WireResponse};
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[test]
    fn test_request_is_map_encoded() {
        let req = WireRequest {
            id: "1".into(),
            method: "get_json".into(),
            payload: json!({"object_model_name": "user", "object_id": "abc123"}),
        };

        let encoded = MsgPackCodec::encode(&req).unwrap();

        // 0x83 = fixmap with 3 entries; an array encoding would start with 0x93.
        assert_eq!(encoded[0], 0x83, "Expected fixmap, got {:02X}", encoded[0]);
    }

    #[test]
    fn test_dynamic_payload_survives() {
        let payload = json!({
            "name": "Boethiah",
            "distance": "some distance",
            "current_location": [40.737291166191476, -74.00704685527774],
            "matches": [],
            "active": true,
            "age": 30,
            "bio": null
        });
        let resp = WireResponse::ok("abc".into(), payload.clone());

        let encoded = MsgPackCodec::encode(&resp).unwrap();
        let decoded: WireResponse = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded.payload, payload);
        assert!(decoded.error.is_none());
    }

    #[test]
    fn test_response_without_error_key() {
        #[derive(Serialize)]
        struct BareResponse<'a> {
            id: &'a str,
            payload: i32,
        }

        let encoded = MsgPackCodec::encode(&BareResponse { id: "9", payload: 5 }).unwrap();
        let decoded: WireResponse = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded.id.as_str(), "9");
        assert_eq!(decoded.payload, json!(5));
        assert!(decoded.error.is_none());
    }

    #[test]
    fn test_nil_decodes_as_none() {
        let val: Option<i32> = None;
        let encoded = MsgPackCodec::encode(&val).unwrap();
        assert_eq!(encoded, vec![0xc0], "None should encode as msgpack nil");
    }

    #[test]
    fn test_binary_buffer() {
        // Python msgpack packs `bytes` as bin8 (0xc4).
        let data: Vec<u8> = vec![0x01, 0x02, 0x03];
        let encoded = MsgPackCodec::encode(&serde_bytes::Bytes::new(&data)).unwrap();
        assert_eq!(encoded[0], 0xc4, "Expected bin8 format");

        let decoded: serde_bytes::ByteBuf = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded.as_ref(), &data);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        #[derive(Deserialize, Debug)]
        struct Strict {
            _id: u32,
        }
        let result: Result<Strict, _> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(result.is_err());
    }
}
