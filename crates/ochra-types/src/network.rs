//! A node identifier paired with its last-known socket address.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::identity::NodeId;

/// Pair of node identifier and remote socket address (a routing-table entry).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    #[serde(with = "socket_addr_serde")]
    pub addr: SocketAddr,
}

impl NodeInfo {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }
}

/// Serializes a `SocketAddr` as its `host:port` string form, matching the
/// wire contract `{id: bytes, addr: string-utf8}`.
mod socket_addr_serde {
    use std::net::SocketAddr;
    use std::str::FromStr;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error> {
        addr.to_string().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SocketAddr, D::Error> {
        let s = String::deserialize(deserializer)?;
        SocketAddr::from_str(&s).map_err(serde::de::Error::custom)
    }
}
