//! CBOR encode/decode helpers.
//!
//! All wire types in this crate are serialized through these two functions so
//! the envelope format stays in one place.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value to CBOR bytes.
pub fn to_cbor<T: Serialize>(value: &T) -> ProtocolResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| ProtocolError::Codec(e.to_string()))?;
    Ok(buf)
}

/// Decodes a value from CBOR bytes.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_preserves_values() {
        let value = vec![1u64, 2, u64::MAX];
        let bytes = to_cbor(&value).unwrap();
        let decoded: Vec<u64> = from_cbor(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn decode_garbage_fails() {
        let result: ProtocolResult<Vec<u64>> = from_cbor(&[0xff, 0x00, 0x13]);
        assert!(result.is_err());
    }
}
