//! # ochra-crypto
//!
//! Cryptographic primitives for the overlay's identity and session layers.
//! The cryptographic suite is fixed: no algorithm negotiation is performed.
//!
//! ## Modules
//!
//! - [`identity`] — ECDSA P-256 key pairs, SHA-1 digests, signing/verifying.
//! - [`aes_ofb`] — AES-OFB stream-cipher wrapping used for session transport.
//! - [`pem`] — PEM-like private-key text persistence.

pub mod aes_ofb;
pub mod identity;
pub mod pem;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Signature verification failed.
    #[error("signature verification failed")]
    SignatureVerification,

    /// Signing operation failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// A key or signature field was not valid for the curve.
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// PEM-like private-key text did not round-trip or self-check.
    #[error("corrupt private key: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
