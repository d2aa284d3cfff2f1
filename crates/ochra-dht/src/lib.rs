//! # ochra-dht
//!
//! Kademlia-style distributed hash table: routing table, RPC engine, and
//! bootstrap logic for one namespace-scoped DHT instance (§4.2, §4.3).
//!
//! ## Key parameters
//!
//! | Parameter | Value |
//! |---|---|
//! | k (bucket size) | 20 (default; configurable, §4.2) |
//! | Number of buckets | 160 |
//! | RPC timeout | 1 second |

pub mod bootstrap;
pub mod kademlia;
pub mod kvstore;
pub mod rpc;

/// Default Kademlia bucket size.
pub const K: usize = 20;

/// Upper bound on concurrent in-flight RPCs per round of an iterative
/// lookup (the Kademlia-paper convention).
pub const ALPHA: usize = 3;

/// Number of buckets in the routing table, one per bit of the 160-bit
/// digest space.
pub const NUM_BUCKETS: usize = 160;

/// RPC reply timeout (§4.3, §7).
pub const REQUEST_TIMEOUT_SECS: u64 = 1;

/// Length of a DHT RPC request ID in bytes.
pub const REQUEST_ID_LEN: usize = 20;

/// Error types for DHT operations.
#[derive(Debug, thiserror::Error)]
pub enum DhtError {
    /// The requested key was not found locally or via iterative lookup.
    #[error("value not found")]
    NotFound,

    /// Bootstrap failed to discover any peers.
    #[error("bootstrap failed: {0}")]
    BootstrapFailed(String),

    /// An RPC waited beyond the one-second timeout.
    #[error("request timed out")]
    Timeout,

    /// No known address for this destination.
    #[error("route not found")]
    RouteNotFound,

    /// Network or I/O error.
    #[error("network error: {0}")]
    Network(String),

    /// msgpack serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// msgpack deserialization error; the datagram is malformed.
    #[error("parse error: {0}")]
    Parse(String),
}

/// Convenience result type for DHT operations.
pub type Result<T> = std::result::Result<T, DhtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(K, 20);
        assert_eq!(NUM_BUCKETS, 160);
        assert_eq!(REQUEST_TIMEOUT_SECS, 1);
        assert_eq!(REQUEST_ID_LEN, 20);
        assert_eq!(ALPHA, 3);
    }

    #[test]
    fn test_error_display() {
        let err = DhtError::RouteNotFound;
        assert_eq!(err.to_string(), "route not found");
    }
}
