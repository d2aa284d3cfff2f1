//! The DHT RPC engine: packet intake/dispatch, pending-reply correlation,
//! and the iterative `find-node`/`find-value`/`store` drivers (§4.3).
//!
//! DHT datagrams are a different wire shape from the signed session
//! [`Packet`](ochra_transport::packet::Packet): `{src, id, method, args}`,
//! unsigned, carried as plain UDP datagrams on the DHT's own socket rather
//! than over a session stream (§6 "DHT RPC transport").

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ochra_types::identity::{Digest, NodeId};
use ochra_types::network::NodeInfo;
use rand::RngCore;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, Mutex, RwLock};

use crate::kademlia::{key_digest, RoutingTable};
use crate::kvstore::KvStore;
use crate::{DhtError, Result, ALPHA, K, REQUEST_ID_LEN, REQUEST_TIMEOUT_SECS};

pub const METHOD_PING: &str = "ping";
pub const METHOD_FIND_NODE: &str = "find-node";
pub const METHOD_STORE: &str = "store";
pub const METHOD_FIND_VALUE: &str = "find-value";
/// Replies echo the request ID with an empty method (§4.3).
pub const METHOD_REPLY: &str = "";

pub type RequestId = [u8; REQUEST_ID_LEN];

fn random_request_id() -> RequestId {
    let mut id = [0u8; REQUEST_ID_LEN];
    rand::thread_rng().fill_bytes(&mut id);
    id
}

/// The dynamic argument bag carried by a DHT command, mirroring the
/// source's untyped `map[string]interface{}` — only the fields relevant to
/// a given `method` are present on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DhtArgs {
    pub id: Option<Digest>,
    pub key: Option<String>,
    pub value: Option<String>,
    pub nodes: Option<Vec<NodeInfo>>,
}

impl Serialize for DhtArgs {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let count = usize::from(self.id.is_some())
            + usize::from(self.key.is_some())
            + usize::from(self.value.is_some())
            + usize::from(self.nodes.is_some());
        let mut map = serializer.serialize_map(Some(count))?;
        if let Some(id) = &self.id {
            map.serialize_entry("id", serde_bytes::Bytes::new(id))?;
        }
        if let Some(key) = &self.key {
            map.serialize_entry("key", key)?;
        }
        if let Some(value) = &self.value {
            map.serialize_entry("value", value)?;
        }
        if let Some(nodes) = &self.nodes {
            map.serialize_entry("nodes", nodes)?;
        }
        map.end()
    }
}

struct DhtArgsVisitor;

impl<'de> Visitor<'de> for DhtArgsVisitor {
    type Value = DhtArgs;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of DHT command arguments")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
        let mut args = DhtArgs::default();
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "id" => {
                    let bytes: Vec<u8> = map.next_value()?;
                    if bytes.len() != 20 {
                        return Err(de::Error::custom("id must be 20 bytes"));
                    }
                    let mut digest = [0u8; 20];
                    digest.copy_from_slice(&bytes);
                    args.id = Some(digest);
                }
                "key" => args.key = Some(map.next_value()?),
                "value" => args.value = Some(map.next_value()?),
                "nodes" => args.nodes = Some(map.next_value()?),
                _ => {
                    let _: de::IgnoredAny = map.next_value()?;
                }
            }
        }
        Ok(args)
    }
}

impl<'de> Deserialize<'de> for DhtArgs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(DhtArgsVisitor)
    }
}

/// One DHT RPC command or reply (§4.3). Unsigned — see §9 Open Questions.
#[derive(Clone, Debug)]
pub struct DhtPacket {
    pub src: NodeId,
    pub id: RequestId,
    pub method: String,
    pub args: DhtArgs,
}

impl Serialize for DhtPacket {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(4))?;
        map.serialize_entry("src", &self.src)?;
        map.serialize_entry("id", serde_bytes::Bytes::new(&self.id))?;
        map.serialize_entry("method", &self.method)?;
        map.serialize_entry("args", &self.args)?;
        map.end()
    }
}

struct DhtPacketVisitor;

impl<'de> Visitor<'de> for DhtPacketVisitor {
    type Value = DhtPacket;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map with src, id, method and args fields")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
        let mut src: Option<NodeId> = None;
        let mut id: Option<RequestId> = None;
        let mut method: Option<String> = None;
        let mut args = DhtArgs::default();
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "src" => src = Some(map.next_value()?),
                "id" => {
                    let bytes: Vec<u8> = map.next_value()?;
                    if bytes.len() != REQUEST_ID_LEN {
                        return Err(de::Error::custom("request id must be 20 bytes"));
                    }
                    let mut buf = [0u8; REQUEST_ID_LEN];
                    buf.copy_from_slice(&bytes);
                    id = Some(buf);
                }
                "method" => method = Some(map.next_value()?),
                "args" => args = map.next_value()?,
                _ => {
                    let _: de::IgnoredAny = map.next_value()?;
                }
            }
        }
        Ok(DhtPacket {
            src: src.ok_or_else(|| de::Error::missing_field("src"))?,
            id: id.ok_or_else(|| de::Error::missing_field("id"))?,
            method: method.ok_or_else(|| de::Error::missing_field("method"))?,
            args,
        })
    }
}

impl<'de> Deserialize<'de> for DhtPacket {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(DhtPacketVisitor)
    }
}

pub fn encode(packet: &DhtPacket) -> Result<Vec<u8>> {
    rmp_serde::to_vec(packet).map_err(|e| DhtError::Serialization(e.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<DhtPacket> {
    rmp_serde::from_slice(bytes).map_err(|e| DhtError::Parse(e.to_string()))
}

/// One namespace-scoped DHT instance: routing table, local store, pending
/// RPC correlation, and the UDP socket it shares with every other namespace
/// on the same process (§4.3 "Namespace isolation").
pub struct Dht {
    namespace: ochra_types::identity::Namespace,
    self_id: NodeId,
    k: usize,
    table: RwLock<RoutingTable>,
    kv: KvStore,
    pending: Mutex<HashMap<RequestId, oneshot::Sender<DhtPacket>>>,
    socket: Arc<UdpSocket>,
}

impl Dht {
    pub fn new(self_id: NodeId, socket: Arc<UdpSocket>, k: usize) -> Self {
        Self {
            namespace: self_id.namespace,
            self_id,
            k,
            table: RwLock::new(RoutingTable::new(self_id, k)),
            kv: KvStore::new(),
            pending: Mutex::new(HashMap::new()),
            socket,
        }
    }

    /// Convenience constructor using the default bucket size (§4.2).
    pub fn with_default_k(self_id: NodeId, socket: Arc<UdpSocket>) -> Self {
        Self::new(self_id, socket, K)
    }

    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    pub async fn get(&self, id: &NodeId) -> Option<NodeInfo> {
        self.table.read().await.find(id)
    }

    pub async fn add(&self, info: NodeInfo) {
        self.table.write().await.insert(info);
    }

    pub async fn table_len(&self) -> usize {
        self.table.read().await.len()
    }

    /// Handle one inbound datagram. Namespace mismatches, self-addressed
    /// packets, and malformed input are dropped silently (§4.3 "Packet
    /// intake").
    pub async fn process_packet(&self, bytes: &[u8], from: SocketAddr) {
        let packet = match decode(bytes) {
            Ok(p) => p,
            Err(_) => return,
        };
        if packet.src.namespace != self.namespace {
            return;
        }
        if packet.src == self.self_id {
            return;
        }

        self.add(NodeInfo {
            id: packet.src,
            addr: from,
        })
        .await;

        if packet.method == METHOD_REPLY {
            if let Some(tx) = self.pending.lock().await.remove(&packet.id) {
                let _ = tx.send(packet);
            }
            return;
        }

        let reply_args = match packet.method.as_str() {
            METHOD_PING => Some(DhtArgs::default()),
            METHOD_FIND_NODE => {
                let Some(target_digest) = packet.args.id else {
                    return;
                };
                let target = NodeId::new(self.namespace, target_digest);
                let nodes = self.table.read().await.nearest(target, self.k);
                Some(DhtArgs {
                    nodes: Some(nodes),
                    ..Default::default()
                })
            }
            METHOD_STORE => {
                let (Some(key), Some(value)) = (packet.args.key, packet.args.value) else {
                    return;
                };
                self.kv.put(key, value).await;
                None
            }
            METHOD_FIND_VALUE => {
                let Some(key) = packet.args.key else {
                    return;
                };
                if let Some(value) = self.kv.get(&key).await {
                    Some(DhtArgs {
                        value: Some(value),
                        ..Default::default()
                    })
                } else {
                    let target = NodeId::new(self.namespace, key_digest(&key));
                    let nodes = self.table.read().await.nearest(target, self.k);
                    Some(DhtArgs {
                        nodes: Some(nodes),
                        ..Default::default()
                    })
                }
            }
            _ => return,
        };

        if let Some(args) = reply_args {
            let reply = DhtPacket {
                src: self.self_id,
                id: packet.id,
                method: METHOD_REPLY.to_string(),
                args,
            };
            let _ = self.send_packet(from, &reply).await;
        }
    }

    async fn send_packet(&self, to: SocketAddr, packet: &DhtPacket) -> Result<()> {
        let bytes = encode(packet)?;
        self.socket
            .send_to(&bytes, to)
            .await
            .map_err(|e| DhtError::Network(e.to_string()))?;
        Ok(())
    }

    async fn send_and_wait(&self, to: SocketAddr, method: &str, args: DhtArgs) -> Result<DhtPacket> {
        let id = random_request_id();
        let packet = DhtPacket {
            src: self.self_id,
            id,
            method: method.to_string(),
            args,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.send_packet(to, &packet).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let outcome = tokio::time::timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS), rx).await;
        self.pending.lock().await.remove(&id);
        match outcome {
            Ok(Ok(reply)) => Ok(reply),
            _ => Err(DhtError::Timeout),
        }
    }

    /// Send an unsolicited `ping` to `addr` carrying our real node ID,
    /// bootstrapping the remote side to insert us (§4.3 `discover`).
    pub async fn discover(&self, addr: SocketAddr) -> Result<()> {
        let packet = DhtPacket {
            src: self.self_id,
            id: random_request_id(),
            method: METHOD_PING.to_string(),
            args: DhtArgs::default(),
        };
        self.send_packet(addr, &packet).await
    }

    /// A round-trip `ping`, inserting the peer on success (via the normal
    /// `process_packet` path when the reply arrives).
    pub async fn ping(&self, addr: SocketAddr) -> Result<()> {
        self.send_and_wait(addr, METHOD_PING, DhtArgs::default())
            .await?;
        Ok(())
    }

    async fn query_find_node(&self, addr: SocketAddr, target: NodeId) -> Result<Vec<NodeInfo>> {
        let reply = self
            .send_and_wait(
                addr,
                METHOD_FIND_NODE,
                DhtArgs {
                    id: Some(target.digest),
                    ..Default::default()
                },
            )
            .await?;
        Ok(reply.args.nodes.unwrap_or_default())
    }

    /// Iterative `find-node(target)` (§4.3): dispatch to up to `ALPHA`
    /// currently known, not-yet-requested candidates in parallel each
    /// round, folding in newly discovered nodes, until the frontier is
    /// exhausted.
    pub async fn find_nearest_node(self: &Arc<Self>, target: NodeId) -> Vec<NodeInfo> {
        let mut known = self.table.read().await.nearest(target, self.k);
        let mut requested: HashSet<NodeId> = HashSet::new();

        loop {
            let batch: Vec<NodeInfo> = known
                .iter()
                .filter(|n| !requested.contains(&n.id))
                .take(ALPHA)
                .cloned()
                .collect();
            if batch.is_empty() {
                break;
            }
            for n in &batch {
                requested.insert(n.id);
            }

            let mut handles = Vec::with_capacity(batch.len());
            for n in batch {
                let dht = Arc::clone(self);
                handles.push(tokio::spawn(
                    async move { dht.query_find_node(n.addr, target).await },
                ));
            }

            for handle in handles {
                let Ok(Ok(nodes)) = handle.await else {
                    continue;
                };
                for info in nodes {
                    self.add(info.clone()).await;
                    if !known.iter().any(|k| k.id == info.id) {
                        known.push(info);
                    }
                }
            }
        }

        known.sort_by_key(|n| n.id.xor_distance(&target));
        known.truncate(self.k);
        known
    }

    /// Iterative `find-value(key)` (§4.3): short-circuits on a local hit,
    /// returns as soon as any responder yields a value, and only recurses
    /// into nodes strictly closer to `SHA-1(key)` than the node that
    /// returned them (distance-monotone descent).
    pub async fn load_value(self: &Arc<Self>, key: &str) -> Option<String> {
        if let Some(value) = self.kv.get(key).await {
            return Some(value);
        }

        let target = NodeId::new(self.namespace, key_digest(key));
        let mut known = self.table.read().await.nearest(target, self.k);
        let mut requested: HashSet<NodeId> = HashSet::new();

        loop {
            let batch: Vec<NodeInfo> = known
                .iter()
                .filter(|n| !requested.contains(&n.id))
                .take(ALPHA)
                .cloned()
                .collect();
            if batch.is_empty() {
                return None;
            }
            for n in &batch {
                requested.insert(n.id);
            }

            let mut handles = Vec::with_capacity(batch.len());
            for n in &batch {
                let dht = Arc::clone(self);
                let addr = n.addr;
                let from_distance = n.id.xor_distance(&target);
                let key_owned = key.to_string();
                handles.push(tokio::spawn(async move {
                    let reply = dht
                        .send_and_wait(
                            addr,
                            METHOD_FIND_VALUE,
                            DhtArgs {
                                key: Some(key_owned),
                                ..Default::default()
                            },
                        )
                        .await;
                    (from_distance, reply)
                }));
            }

            for handle in handles {
                let Ok((from_distance, reply)) = handle.await else {
                    continue;
                };
                let Ok(reply) = reply else {
                    continue;
                };
                if let Some(value) = reply.args.value {
                    return Some(value);
                }
                if let Some(nodes) = reply.args.nodes {
                    for info in nodes {
                        self.add(info.clone()).await;
                        let distance = info.id.xor_distance(&target);
                        if distance < from_distance && !known.iter().any(|k| k.id == info.id) {
                            known.push(info);
                        }
                    }
                }
            }
        }
    }

    /// `store(key, value)` (§4.3): iteratively find the nodes nearest
    /// `SHA-1(key)`, then fire-and-forget a `store` to each.
    pub async fn store_value(self: &Arc<Self>, key: String, value: String) {
        let target = NodeId::new(self.namespace, key_digest(&key));
        let nodes = self.find_nearest_node(target).await;
        for n in nodes {
            let dht = Arc::clone(self);
            let key = key.clone();
            let value = value.clone();
            tokio::spawn(async move {
                let packet = DhtPacket {
                    src: dht.self_id,
                    id: random_request_id(),
                    method: METHOD_STORE.to_string(),
                    args: DhtArgs {
                        key: Some(key),
                        value: Some(value),
                        ..Default::default()
                    },
                };
                let _ = dht.send_packet(n.addr, &packet).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ochra_types::identity::Namespace;

    fn node_id(ns: u8, digest_byte: u8) -> NodeId {
        let namespace: Namespace = [ns; 4];
        let digest: Digest = [digest_byte; 20];
        NodeId::new(namespace, digest)
    }

    #[test]
    fn test_dht_args_roundtrip_only_present_fields() {
        let args = DhtArgs {
            key: Some("hello".to_string()),
            value: Some("world".to_string()),
            ..Default::default()
        };
        let bytes = rmp_serde::to_vec(&args).expect("encode");
        let decoded: DhtArgs = rmp_serde::from_slice(&bytes).expect("decode");
        assert_eq!(decoded, args);
    }

    #[test]
    fn test_dht_packet_roundtrip() {
        let packet = DhtPacket {
            src: node_id(1, 2),
            id: [7u8; 20],
            method: METHOD_FIND_NODE.to_string(),
            args: DhtArgs {
                id: Some([9u8; 20]),
                ..Default::default()
            },
        };
        let bytes = encode(&packet).expect("encode");
        let decoded = decode(&bytes).expect("decode");
        assert_eq!(decoded.src, packet.src);
        assert_eq!(decoded.id, packet.id);
        assert_eq!(decoded.method, packet.method);
        assert_eq!(decoded.args, packet.args);
    }

    #[tokio::test]
    async fn test_ping_round_trip_between_two_instances() {
        let socket_a = Arc::new(UdpSocket::bind("127.0.0.1:0").await.expect("bind a"));
        let socket_b = Arc::new(UdpSocket::bind("127.0.0.1:0").await.expect("bind b"));
        let addr_a = socket_a.local_addr().expect("addr a");
        let addr_b = socket_b.local_addr().expect("addr b");

        let dht_a = Arc::new(Dht::with_default_k(node_id(1, 1), Arc::clone(&socket_a)));
        let dht_b = Arc::new(Dht::with_default_k(node_id(1, 2), Arc::clone(&socket_b)));

        let dht_b_loop = Arc::clone(&dht_b);
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                let Ok((n, from)) = dht_b_loop.socket_recv(&mut buf).await else {
                    break;
                };
                dht_b_loop.process_packet(&buf[..n], from).await;
            }
        });

        dht_a.add(NodeInfo {
            id: dht_b.self_id(),
            addr: addr_b,
        })
        .await;

        dht_a.ping(addr_b).await.expect("ping reaches b");
        assert!(dht_b.get(&dht_a.self_id()).await.is_some());
        let _ = addr_a;
    }

    impl Dht {
        async fn socket_recv(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
            self.socket.recv_from(buf).await
        }
    }
}
