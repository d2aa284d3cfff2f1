//! # ochra-router
//!
//! Multiplexes namespace-scoped DHT instances over one raw UDP socket,
//! maintains a pool of authenticated sessions keyed by node ID, and bridges
//! application sends to session writes — translating node IDs to remote
//! addresses via DHT lookup and parking packets whose route isn't yet known
//! (§4.4).

pub mod router;

pub use router::{Message, Router, RouterConfig};

/// Errors surfaced by the router layer.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("route not found")]
    RouteNotFound,

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("failed to bind a port pair in the configured range")]
    BindFailed,

    #[error("transport error: {0}")]
    Transport(#[from] ochra_transport::TransportError),

    #[error("dht error: {0}")]
    Dht(#[from] ochra_dht::DhtError),

    #[error("router is closed")]
    Closed,
}

/// Convenience result type for router operations.
pub type Result<T> = std::result::Result<T, RouterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(RouterError::RouteNotFound.to_string(), "route not found");
        assert_eq!(RouterError::Closed.to_string(), "router is closed");
    }
}
