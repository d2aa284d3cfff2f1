//! ECDSA P-256 key pairs, SHA-1 digests, signing and verification.
//!
//! Signatures are computed over the SHA-1 prehash of the signed region,
//! per the wire contract in Section 3/4.1: `sign(key, bytes)` hashes `bytes`
//! with SHA-1 first, then signs the 20-byte digest directly (not SHA-256,
//! as most ECDSA-over-P256 deployments default to).

use std::fmt;

use ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature as P256Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{EncodedPoint, FieldBytes};
use rand_core::OsRng;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest as _, Sha1};
use zeroize::Zeroize;

use ochra_types::identity::Digest;

use crate::{CryptoError, Result};

/// An ECDSA P-256 public key, held as raw (x, y) coordinates.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    x: [u8; 32],
    y: [u8; 32],
}

/// An ECDSA P-256 private (signing) key.
pub struct PrivateKey {
    d: [u8; 32],
    public: PublicKey,
}

impl Clone for PrivateKey {
    fn clone(&self) -> Self {
        Self {
            d: self.d,
            public: self.public.clone(),
        }
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        self.d.zeroize();
    }
}

/// An ECDSA (r, s) signature pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Signature {
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl PublicKey {
    pub fn x(&self) -> &[u8; 32] {
        &self.x
    }

    pub fn y(&self) -> &[u8; 32] {
        &self.y
    }

    fn to_verifying_key(&self) -> Result<VerifyingKey> {
        let point = EncodedPoint::from_affine_coordinates(
            FieldBytes::from_slice(&self.x),
            FieldBytes::from_slice(&self.y),
            false,
        );
        VerifyingKey::from_encoded_point(&point)
            .map_err(|e| CryptoError::InvalidKeyMaterial(e.to_string()))
    }

    fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(point.x().expect("uncompressed point has x"));
        y.copy_from_slice(point.y().expect("uncompressed point has y"));
        Self { x, y }
    }

    /// SHA-1 digest of X‖Y — the 20-byte public-key digest (§3).
    pub fn digest(&self) -> Digest {
        let mut hasher = Sha1::new();
        hasher.update(self.x);
        hasher.update(self.y);
        let hash = hasher.finalize();
        let mut out = [0u8; 20];
        out.copy_from_slice(&hash);
        out
    }

    /// Verify `message` against `signature` under this public key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(verifying_key) = self.to_verifying_key() else {
            return false;
        };
        let Ok(sig) = signature.to_p256() else {
            return false;
        };
        let mut hasher = Sha1::new();
        hasher.update(message);
        let hash = hasher.finalize();
        verifying_key.verify_prehash(&hash, &sig).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey(x={}..)", hex::encode(&self.x[..4]))
    }
}

impl PrivateKey {
    /// Generate a fresh P-256 key pair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        Self::from_signing_key(signing_key)
    }

    /// Reconstruct from a raw 32-byte scalar.
    pub fn from_bytes(d: &[u8; 32]) -> Result<Self> {
        let signing_key = SigningKey::from_slice(d)
            .map_err(|e| CryptoError::InvalidKeyMaterial(e.to_string()))?;
        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = *signing_key.verifying_key();
        let mut d = [0u8; 32];
        d.copy_from_slice(&signing_key.to_bytes());
        Self {
            d,
            public: PublicKey::from_verifying_key(&verifying_key),
        }
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.d
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Sign `message`: hash with SHA-1, then sign the 20-byte prehash.
    pub fn sign(&self, message: &[u8]) -> Result<Signature> {
        let signing_key = SigningKey::from_slice(&self.d)
            .map_err(|e| CryptoError::InvalidKeyMaterial(e.to_string()))?;
        let mut hasher = Sha1::new();
        hasher.update(message);
        let hash = hasher.finalize();
        let sig: P256Signature = signing_key
            .sign_prehash(&hash)
            .map_err(|e| CryptoError::Signing(e.to_string()))?;
        Ok(Signature::from_p256(&sig))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey(..)")
    }
}

impl Signature {
    fn to_p256(&self) -> Result<P256Signature> {
        P256Signature::from_scalars(self.r, self.s)
            .map_err(|e| CryptoError::InvalidKeyMaterial(e.to_string()))
    }

    fn from_p256(sig: &P256Signature) -> Self {
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&sig.r().to_bytes());
        s.copy_from_slice(&sig.s().to_bytes());
        Self { r, s }
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature(r={}..)", hex::encode(&self.r[..4]))
    }
}

/// Verify `message` against `signature` under `public`, returning `bool`
/// (never fails — the free-function form of the §4.1 `verify` operation).
pub fn verify(public: &PublicKey, message: &[u8], signature: &Signature) -> bool {
    public.verify(message, signature)
}

/// Sign `message` under `private`, the free-function form of §4.1 `sign`.
pub fn sign(private: &PrivateKey, message: &[u8]) -> Result<Signature> {
    private.sign(message)
}

// --- Serialization: keys as {x,y[,d]} maps, signatures as {r,s} maps (§4.1). ---

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("x", &serde_bytes::Bytes::new(&self.x))?;
        map.serialize_entry("y", &serde_bytes::Bytes::new(&self.y))?;
        map.end()
    }
}

struct PublicKeyVisitor;

impl<'de> Visitor<'de> for PublicKeyVisitor {
    type Value = PublicKey;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map with x and y byte fields")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
        let mut x: Option<Vec<u8>> = None;
        let mut y: Option<Vec<u8>> = None;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "x" => x = Some(map.next_value()?),
                "y" => y = Some(map.next_value()?),
                _ => {
                    let _: serde::de::IgnoredAny = map.next_value()?;
                }
            }
        }
        let x = x.ok_or_else(|| de::Error::missing_field("x"))?;
        let y = y.ok_or_else(|| de::Error::missing_field("y"))?;
        if x.len() != 32 || y.len() != 32 {
            return Err(de::Error::custom("public key coordinate must be 32 bytes"));
        }
        let mut xb = [0u8; 32];
        let mut yb = [0u8; 32];
        xb.copy_from_slice(&x);
        yb.copy_from_slice(&y);
        Ok(PublicKey { x: xb, y: yb })
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(PublicKeyVisitor)
    }
}

impl Serialize for PrivateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("x", &serde_bytes::Bytes::new(&self.public.x))?;
        map.serialize_entry("y", &serde_bytes::Bytes::new(&self.public.y))?;
        map.serialize_entry("d", &serde_bytes::Bytes::new(&self.d))?;
        map.end()
    }
}

struct PrivateKeyVisitor;

impl<'de> Visitor<'de> for PrivateKeyVisitor {
    type Value = PrivateKey;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map with x, y and d byte fields")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
        let mut d: Option<Vec<u8>> = None;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "d" => d = Some(map.next_value()?),
                _ => {
                    let _: serde::de::IgnoredAny = map.next_value()?;
                }
            }
        }
        let d = d.ok_or_else(|| de::Error::missing_field("d"))?;
        if d.len() != 32 {
            return Err(de::Error::custom("private scalar must be 32 bytes"));
        }
        let mut db = [0u8; 32];
        db.copy_from_slice(&d);
        PrivateKey::from_bytes(&db).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(PrivateKeyVisitor)
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("r", &serde_bytes::Bytes::new(&self.r))?;
        map.serialize_entry("s", &serde_bytes::Bytes::new(&self.s))?;
        map.end()
    }
}

struct SignatureVisitor;

impl<'de> Visitor<'de> for SignatureVisitor {
    type Value = Signature;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map with r and s byte fields")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
        let mut r: Option<Vec<u8>> = None;
        let mut s: Option<Vec<u8>> = None;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "r" => r = Some(map.next_value()?),
                "s" => s = Some(map.next_value()?),
                _ => {
                    let _: serde::de::IgnoredAny = map.next_value()?;
                }
            }
        }
        let r = r.ok_or_else(|| de::Error::missing_field("r"))?;
        let s = s.ok_or_else(|| de::Error::missing_field("s"))?;
        if r.len() != 32 || s.len() != 32 {
            return Err(de::Error::custom("signature component must be 32 bytes"));
        }
        let mut rb = [0u8; 32];
        let mut sb = [0u8; 32];
        rb.copy_from_slice(&r);
        sb.copy_from_slice(&s);
        Ok(Signature { r: rb, s: sb })
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(SignatureVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_sign_verify_roundtrip() {
        let key = PrivateKey::generate();
        let sig = key.sign(b"hello overlay").expect("sign");
        assert!(key.public_key().verify(b"hello overlay", &sig));
    }

    #[test]
    fn test_verify_rejects_wrong_message() {
        let key = PrivateKey::generate();
        let sig = key.sign(b"hello").expect("sign");
        assert!(!key.public_key().verify(b"goodbye", &sig));
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let key = PrivateKey::generate();
        let other = PrivateKey::generate();
        let sig = key.sign(b"hello").expect("sign");
        assert!(!other.public_key().verify(b"hello", &sig));
    }

    #[test]
    fn test_from_bytes_roundtrip() {
        let key = PrivateKey::generate();
        let bytes = key.to_bytes();
        let restored = PrivateKey::from_bytes(&bytes).expect("restore");
        assert_eq!(restored.public_key().x(), key.public_key().x());
        assert_eq!(restored.public_key().y(), key.public_key().y());
    }

    #[test]
    fn test_digest_is_20_bytes_and_deterministic() {
        let key = PrivateKey::generate();
        let d1 = key.public_key().digest();
        let d2 = key.public_key().digest();
        assert_eq!(d1.len(), 20);
        assert_eq!(d1, d2);
    }

    #[test]
    fn test_public_key_msgpack_roundtrip() {
        let key = PrivateKey::generate();
        let bytes = rmp_serde::to_vec_named(key.public_key()).expect("encode");
        let decoded: PublicKey = rmp_serde::from_slice(&bytes).expect("decode");
        assert_eq!(decoded, *key.public_key());
    }

    #[test]
    fn test_private_key_msgpack_roundtrip() {
        let key = PrivateKey::generate();
        let bytes = rmp_serde::to_vec_named(&key).expect("encode");
        let decoded: PrivateKey = rmp_serde::from_slice(&bytes).expect("decode");
        assert_eq!(decoded.to_bytes(), key.to_bytes());
    }

    #[test]
    fn test_signature_msgpack_roundtrip() {
        let key = PrivateKey::generate();
        let sig = key.sign(b"roundtrip").expect("sign");
        let bytes = rmp_serde::to_vec_named(&sig).expect("encode");
        let decoded: Signature = rmp_serde::from_slice(&bytes).expect("decode");
        assert_eq!(decoded, sig);
    }
}
