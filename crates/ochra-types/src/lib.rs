//! # ochra-types
//!
//! Shared identifier and address types used across the Ochra overlay
//! workspace: the node identifier (namespace + public-key digest) and the
//! node/address pair the routing table and session layer both operate on.

pub mod identity;
pub mod network;

pub use identity::{Digest, Namespace, NodeId, NODE_ID_PREFIX};
pub use network::NodeInfo;
