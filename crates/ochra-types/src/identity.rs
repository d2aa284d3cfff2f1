//! Node identifiers: a one-byte type prefix, a 4-byte namespace, and a
//! 20-byte public-key digest.

use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Wire prefix byte for a node ID (`0x90`).
pub const NODE_ID_PREFIX: u8 = 0x90;

/// SHA-1 digest of a public key's X‖Y coordinates.
pub type Digest = [u8; 20];

/// 4-byte tag partitioning DHT instances.
pub type Namespace = [u8; 4];

/// Errors decoding a node identifier from bytes or base58 text.
#[derive(Debug, thiserror::Error)]
pub enum NodeIdError {
    #[error("node id too short")]
    TooShort,
    #[error("node id has wrong prefix byte: {0:#x}")]
    WrongPrefix(u8),
    #[error("node id digest is longer than 20 bytes")]
    DigestTooLong,
    #[error("invalid base58: {0}")]
    Base58(#[from] bs58::decode::Error),
}

/// Namespace + digest; the network-layer address of a peer.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct NodeId {
    pub namespace: Namespace,
    pub digest: Digest,
}

impl NodeId {
    pub fn new(namespace: Namespace, digest: Digest) -> Self {
        Self { namespace, digest }
    }

    /// Decode a node ID from its wire form: prefix ‖ namespace ‖ up-to-20
    /// trailing digest bytes (right-aligned; shorter digests are legal and
    /// are left-padded with zeros).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, NodeIdError> {
        if bytes.is_empty() {
            return Err(NodeIdError::TooShort);
        }
        if bytes[0] != NODE_ID_PREFIX {
            return Err(NodeIdError::WrongPrefix(bytes[0]));
        }
        let rest = &bytes[1..];
        if rest.len() < 4 {
            return Err(NodeIdError::TooShort);
        }
        let mut namespace = [0u8; 4];
        namespace.copy_from_slice(&rest[..4]);

        let digest_bytes = &rest[4..];
        if digest_bytes.len() > 20 {
            return Err(NodeIdError::DigestTooLong);
        }
        let mut digest = [0u8; 20];
        let offset = 20 - digest_bytes.len();
        digest[offset..].copy_from_slice(digest_bytes);

        Ok(Self { namespace, digest })
    }

    /// Wire form: `0x90` ‖ namespace ‖ digest (always the full 20 digest
    /// bytes on encode; only decode accepts shorter trailing sequences).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(25);
        out.push(NODE_ID_PREFIX);
        out.extend_from_slice(&self.namespace);
        out.extend_from_slice(&self.digest);
        out
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.to_bytes()).into_string()
    }

    pub fn from_base58(s: &str) -> Result<Self, NodeIdError> {
        let bytes = bs58::decode(s).into_vec()?;
        Self::from_bytes(&bytes)
    }

    /// True iff both node IDs carry the same namespace.
    pub fn namespace_matches(&self, other: &NodeId) -> bool {
        self.namespace == other.namespace
    }

    /// XOR of the digest bytes only; namespace is not part of the metric.
    pub fn xor_distance(&self, other: &NodeId) -> Digest {
        let mut out = [0u8; 20];
        for i in 0..20 {
            out[i] = self.digest[i] ^ other.digest[i];
        }
        out
    }

    /// Zero-based index of the highest set bit of a distance, or 0 if the
    /// distance is all-zero. Used to pick a routing-table bucket.
    pub fn log2int(distance: &Digest) -> usize {
        for (byte_index, byte) in distance.iter().enumerate() {
            if *byte != 0 {
                let bit_in_byte = 7 - byte.leading_zeros() as usize;
                return (19 - byte_index) * 8 + bit_in_byte;
            }
        }
        0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.to_base58())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

struct NodeIdVisitor;

impl<'de> Visitor<'de> for NodeIdVisitor {
    type Value = NodeId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a prefixed node id byte sequence")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        NodeId::from_bytes(v).map_err(de::Error::custom)
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
        self.visit_bytes(&v)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_bytes(NodeIdVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ns(b: u8) -> Namespace {
        [b; 4]
    }

    fn digest(b: u8) -> Digest {
        [b; 20]
    }

    #[test]
    fn test_bytes_roundtrip() {
        let id = NodeId::new(ns(1), digest(2));
        let bytes = id.to_bytes();
        assert_eq!(bytes.len(), 25);
        assert_eq!(bytes[0], NODE_ID_PREFIX);
        let decoded = NodeId::from_bytes(&bytes).expect("decode");
        assert_eq!(decoded, id);
    }

    #[test]
    fn test_base58_roundtrip() {
        let id = NodeId::new(ns(9), digest(200));
        let text = id.to_base58();
        let decoded = NodeId::from_base58(&text).expect("decode");
        assert_eq!(decoded, id);
    }

    #[test]
    fn test_wrong_prefix_rejected() {
        let mut bytes = NodeId::new(ns(1), digest(2)).to_bytes();
        bytes[0] = 0x00;
        assert!(matches!(
            NodeId::from_bytes(&bytes),
            Err(NodeIdError::WrongPrefix(0x00))
        ));
    }

    #[test]
    fn test_short_digest_left_padded() {
        let mut bytes = vec![NODE_ID_PREFIX];
        bytes.extend_from_slice(&ns(1));
        bytes.extend_from_slice(&[0xAB, 0xCD]);
        let decoded = NodeId::from_bytes(&bytes).expect("decode");
        let mut expected = [0u8; 20];
        expected[18] = 0xAB;
        expected[19] = 0xCD;
        assert_eq!(decoded.digest, expected);
    }

    #[test]
    fn test_xor_distance_self_is_zero() {
        let id = NodeId::new(ns(1), digest(42));
        assert_eq!(id.xor_distance(&id), [0u8; 20]);
    }

    #[test]
    fn test_log2int_zero() {
        assert_eq!(NodeId::log2int(&[0u8; 20]), 0);
    }

    #[test]
    fn test_log2int_highest_bit() {
        let mut d = [0u8; 20];
        d[0] = 0x80; // highest possible bit
        assert_eq!(NodeId::log2int(&d), 159);

        let mut d2 = [0u8; 20];
        d2[19] = 0x01; // lowest possible bit
        assert_eq!(NodeId::log2int(&d2), 0);
    }

    #[test]
    fn test_namespace_match() {
        let a = NodeId::new(ns(1), digest(1));
        let b = NodeId::new(ns(1), digest(2));
        let c = NodeId::new(ns(2), digest(1));
        assert!(a.namespace_matches(&b));
        assert!(!a.namespace_matches(&c));
    }

    #[test]
    fn test_serde_roundtrip_via_rmp() {
        let id = NodeId::new(ns(3), digest(77));
        let bytes = rmp_serde::to_vec(&id).expect("encode");
        let decoded: NodeId = rmp_serde::from_slice(&bytes).expect("decode");
        assert_eq!(decoded, id);
    }
}
