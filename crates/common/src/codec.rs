// Base64 framing for binary payloads carried inside JSON hub frames.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

/// Encode raw bytes as standard (padded) base64.
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a standard base64 string produced by [`encode_base64`].
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>, CodecError> {
    STANDARD.decode(encoded).map_err(|error| CodecError::InvalidBase64(error.to_string()))
}

/// Encode a serializable value as base64 of its JSON form.
pub fn encode_json_base64<T: serde::Serialize>(value: &T) -> Result<String, CodecError> {
    let json = serde_json::to_vec(value).map_err(|error| CodecError::Json(error.to_string()))?;
    Ok(encode_base64(&json))
}

/// Inverse of [`encode_json_base64`].
pub fn decode_json_base64<T: serde::de::DeserializeOwned>(encoded: &str) -> Result<T, CodecError> {
    let bytes = decode_base64(encoded)?;
    serde_json::from_slice(&bytes).map_err(|error| CodecError::Json(error.to_string()))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("payload is not valid base64: {0}")]
    InvalidBase64(String),
    #[error("payload is not valid JSON: {0}")]
    Json(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_with_padding() {
        assert_eq!(encode_base64(b"ab"), "YWI=");
        assert_eq!(encode_base64(&[]), "");
    }

    #[test]
    fn decodes_known_value() {
        assert_eq!(decode_base64("aGVsbG8=").expect("valid base64"), b"hello");
    }

    #[test]
    fn rejects_garbage() {
        let error = decode_base64("not base64!!").expect_err("should reject");
        assert!(matches!(error, CodecError::InvalidBase64(_)));
    }

    #[test]
    fn json_payload_round_trips() {
        let value = serde_json::json!({ "a": 1, "b": [true, null] });
        let encoded = encode_json_base64(&value).expect("encode");
        let decoded: serde_json::Value = decode_json_base64(&encoded).expect("decode");
        assert_eq!(decoded, value);
    }

    #[test]
    fn json_payload_rejects_non_json_bytes() {
        let encoded = encode_base64(&[0xff, 0x00, 0x13]);
        let error = decode_json_base64::<serde_json::Value>(&encoded).expect_err("not json");
        assert!(matches!(error, CodecError::Json(_)));
    }
}
