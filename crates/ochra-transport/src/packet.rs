//! The wire packet: a signed, msgpack-encoded envelope carrying one typed
//! payload between two node identifiers (§3/§4.1).
//!
//! The signature covers `[dst, src, type, payload]` encoded as a *positional*
//! msgpack array — not the outer map form the packet itself uses — so the
//! signed region is unambiguous regardless of how map keys might be reordered
//! or extended later.

use ochra_crypto::identity::{PrivateKey, PublicKey, Signature};
use ochra_types::identity::NodeId;
use serde::{Deserialize, Serialize};

use crate::{msgpack, Result, TransportError};

/// A public-key announcement, exchanged in handshake step 1.
pub const TYPE_PUBKEY: &str = "pubkey";
/// A session-key announcement, exchanged in handshake step 2.
pub const TYPE_KEY: &str = "key";
/// A DHT RPC command or reply.
pub const TYPE_DHT: &str = "dht";
/// An application message, delivered to the messaging facade.
pub const TYPE_MSG: &str = "msg";

/// One packet as it travels the wire.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Packet {
    pub dst: NodeId,
    pub src: NodeId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub sign: Option<Signature>,
}

#[derive(Serialize)]
struct SignedRegion<'a> {
    dst: &'a NodeId,
    src: &'a NodeId,
    #[serde(rename = "type")]
    kind: &'a str,
    #[serde(with = "serde_bytes")]
    payload: &'a [u8],
}

fn signed_region(dst: &NodeId, src: &NodeId, kind: &str, payload: &[u8]) -> Result<Vec<u8>> {
    msgpack::to_vec_positional(&SignedRegion {
        dst,
        src,
        kind,
        payload,
    })
}

impl Packet {
    /// Build and sign a packet from `src` to `dst`.
    pub fn sign(
        dst: NodeId,
        src: NodeId,
        kind: impl Into<String>,
        payload: Vec<u8>,
        key: &PrivateKey,
    ) -> Result<Self> {
        let kind = kind.into();
        let region = signed_region(&dst, &src, &kind, &payload)?;
        let sign = key
            .sign(&region)
            .map_err(|e| TransportError::Crypto(e.to_string()))?;
        Ok(Self {
            dst,
            src,
            kind,
            payload,
            sign: Some(sign),
        })
    }

    /// Verify this packet's signature under `public`. `public` must be the
    /// key whose digest matches `self.src`; callers resolve that pairing
    /// themselves (usually via a pinned session key or a DHT lookup).
    pub fn verify(&self, public: &PublicKey) -> bool {
        let Some(sign) = &self.sign else {
            return false;
        };
        let Ok(region) = signed_region(&self.dst, &self.src, &self.kind, &self.payload) else {
            return false;
        };
        public.verify(&region, sign)
    }

    /// Encode as the wire's named msgpack map.
    pub fn encode(&self) -> Result<Vec<u8>> {
        msgpack::to_vec_named(self)
    }

    /// Decode from the wire's named msgpack map.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        msgpack::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ochra_types::identity::{Digest, Namespace};

    fn node_id(tag: u8) -> NodeId {
        let namespace: Namespace = [tag; 4];
        let digest: Digest = [tag; 20];
        NodeId::new(namespace, digest)
    }

    #[test]
    fn test_sign_and_verify_roundtrip() {
        let key = PrivateKey::generate();
        let src = node_id(1);
        let dst = node_id(2);
        let packet = Packet::sign(dst, src, TYPE_MSG, b"hello".to_vec(), &key).expect("sign");
        assert!(packet.verify(key.public_key()));
    }

    #[test]
    fn test_verify_rejects_tampered_payload() {
        let key = PrivateKey::generate();
        let src = node_id(1);
        let dst = node_id(2);
        let mut packet =
            Packet::sign(dst, src, TYPE_MSG, b"hello".to_vec(), &key).expect("sign");
        packet.payload = b"goodbye".to_vec();
        assert!(!packet.verify(key.public_key()));
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let key = PrivateKey::generate();
        let other = PrivateKey::generate();
        let src = node_id(1);
        let dst = node_id(2);
        let packet = Packet::sign(dst, src, TYPE_MSG, b"hello".to_vec(), &key).expect("sign");
        assert!(!packet.verify(other.public_key()));
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let key = PrivateKey::generate();
        let src = node_id(3);
        let dst = node_id(4);
        let packet =
            Packet::sign(dst, src, TYPE_DHT, vec![1, 2, 3], &key).expect("sign");
        let bytes = packet.encode().expect("encode");
        let decoded = Packet::decode(&bytes).expect("decode");
        assert_eq!(decoded.kind, packet.kind);
        assert_eq!(decoded.payload, packet.payload);
        assert!(decoded.verify(key.public_key()));
    }

    #[test]
    fn test_unsigned_packet_fails_verify() {
        let key = PrivateKey::generate();
        let packet = Packet {
            dst: node_id(1),
            src: node_id(2),
            kind: TYPE_MSG.to_string(),
            payload: b"x".to_vec(),
            sign: None,
        };
        assert!(!packet.verify(key.public_key()));
    }
}
