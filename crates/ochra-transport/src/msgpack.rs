//! msgpack encode/decode helpers.
//!
//! Two encodings are used on the wire, matching what each consumer expects:
//! - "named" (map-keyed) for packet envelopes and application payloads, so
//!   fields are self-describing and order-independent.
//! - "positional" (array) for the signed region of a packet, where the
//!   signature covers a fixed tuple rather than a keyed structure.

use serde::{de::DeserializeOwned, Serialize};

use crate::{Result, TransportError};

/// Encode `value` as a msgpack map keyed by field name.
pub fn to_vec_named<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(value).map_err(|e| TransportError::Serialization(e.to_string()))
}

/// Decode a msgpack map (or array, transparently) into `T`.
pub fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    rmp_serde::from_slice(bytes).map_err(|e| TransportError::Deserialization(e.to_string()))
}

/// Encode `value` as a positional msgpack array, field order as declared.
pub fn to_vec_positional<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec(value).map_err(|e| TransportError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn test_named_roundtrip() {
        let value = Sample {
            a: 7,
            b: "seven".to_string(),
        };
        let bytes = to_vec_named(&value).expect("encode");
        let decoded: Sample = from_slice(&bytes).expect("decode");
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_positional_roundtrip() {
        let value = Sample {
            a: 9,
            b: "nine".to_string(),
        };
        let bytes = to_vec_positional(&value).expect("encode");
        let decoded: Sample = from_slice(&bytes).expect("decode");
        assert_eq!(decoded, value);
    }
}
