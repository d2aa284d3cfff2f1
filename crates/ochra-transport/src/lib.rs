//! # ochra-transport
//!
//! Encrypted network transport for the Ochra overlay.
//!
//! - **QUIC/TLS 1.3** connection management via [`quic`]
//! - **Packet codec** — the signed, msgpack-encoded packet format via [`packet`]
//! - **msgpack** serialization helpers via [`msgpack`]
//! - **Session** handshake and AES-OFB stream wrapping via [`session`]
//!
//! ## Architecture
//!
//! ```text
//! Application
//!     |
//!     v
//! Packet (packet.rs)   -- msgpack envelope, ECDSA-signed over dst/src/type/payload
//!     |
//!     v
//! Session (session.rs) -- handshake + AES-OFB keystream wrapping the byte stream
//!     |
//!     v
//! QuicNode (quic.rs)    -- QUIC/TLS 1.3 bidirectional streams
//!     |
//!     v
//! UDP socket
//! ```

pub mod msgpack;
pub mod packet;
pub mod quic;
pub mod session;

/// Error types for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// msgpack serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// msgpack deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Protocol violation (unknown packet type, oversized payload, etc.).
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Invalid or malformed packet.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    /// Packet signature did not verify against the claimed sender.
    #[error("signature verification failed")]
    SignatureVerification,

    /// Cryptographic operation failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// TLS/certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// QUIC connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Handshake did not complete within its deadline.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// I/O error (socket, stream read/write).
    #[error("I/O error: {0}")]
    Io(String),

    /// Internal error (should not occur in normal operation).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
