//! # ochra-facade
//!
//! The messaging facade: a type registry, the `{type, content, id}` wire
//! envelope, and reply-callback correlation with a one-second timeout,
//! sitting directly on top of [`ochra_router::Router`] (§4.5).

pub mod facade;

pub use facade::{Facade, MessageType};

/// Errors surfaced by the messaging facade.
#[derive(Debug, thiserror::Error)]
pub enum FacadeError {
    #[error("message type not registered: {0}")]
    UnknownType(String),

    #[error("envelope encoding failed: {0}")]
    Encode(String),

    #[error("envelope decoding failed: {0}")]
    Decode(String),

    #[error("router error: {0}")]
    Router(#[from] ochra_router::RouterError),
}

/// Convenience result type for facade operations.
pub type Result<T> = std::result::Result<T, FacadeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            FacadeError::UnknownType("foo".to_string()).to_string(),
            "message type not registered: foo"
        );
    }
}
