//! Byte codecs for cached payloads

use crate::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encodes values to bytes and back.
///
/// Used for single payloads and for every entry of a sequence payload.
pub trait ValueCodec<T> {
    /// Encode a value.
    fn encode(&self, value: &T) -> Result<Vec<u8>>;

    /// Decode a value previously produced by [`ValueCodec::encode`].
    fn decode(&self, bytes: &[u8]) -> Result<T>;
}

/// MessagePack codec (default). Compact and binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackCodec;

impl<T: Serialize + DeserializeOwned> ValueCodec<T> for MsgPackCodec {
    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(value)
            .map_err(|e| Error::serialization(format!("Failed to encode value: {e}")))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        rmp_serde::from_slice(bytes)
            .map_err(|e| Error::serialization(format!("Failed to decode value: {e}")))
    }
}

/// JSON codec, handy when payloads should stay human-readable.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T: Serialize + DeserializeOwned> ValueCodec<T> for JsonCodec {
    fn encode(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value)
            .map_err(|e| Error::serialization(format!("Failed to encode value: {e}")))
    }

    fn decode(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::serialization(format!("Failed to decode value: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Frame {
        idx: u32,
        pixels: Vec<u8>,
        tags: BTreeMap<String, f64>,
    }

    fn frame() -> Frame {
        Frame {
            idx: 3,
            pixels: vec![0, 255, 17],
            tags: BTreeMap::from([("exposure".to_string(), 1.5)]),
        }
    }

    #[test]
    fn test_msgpack_decodes_what_it_encodes() {
        let bytes = MsgPackCodec.encode(&frame()).unwrap();
        let back: Frame = MsgPackCodec.decode(&bytes).unwrap();
        assert_eq!(back, frame());
    }

    #[test]
    fn test_json_output_is_readable() {
        let bytes = ValueCodec::<Frame>::encode(&JsonCodec, &frame()).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"exposure\""));
    }

    #[test]
    fn test_decoding_wrong_type_fails() {
        let bytes = ValueCodec::<String>::encode(&MsgPackCodec, &"text".to_string()).unwrap();
        let err = ValueCodec::<Frame>::decode(&MsgPackCodec, &bytes).unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }
}
