//! Kademlia routing table: 160 buckets indexed by XOR-distance magnitude.
//!
//! Bucket `b` holds nodes whose XOR distance from the local node has
//! `⌊log2⌋` equal to `b` (§4.2). Eviction is simple overwrite-the-oldest-slot
//! rather than a ping-before-evict LRU scheme: a full bucket drops its
//! longest-resident entry to make room for a new one.

use ochra_types::identity::{Digest, NodeId};
use ochra_types::network::NodeInfo;

use crate::NUM_BUCKETS;

/// A single k-bucket: a bounded, ordered list of peer entries. The front is
/// the oldest (first-inserted) entry; the back is the most recent.
#[derive(Clone, Debug, Default)]
struct Bucket {
    entries: Vec<NodeInfo>,
}

/// The Kademlia routing table for one DHT instance.
pub struct RoutingTable {
    local_id: NodeId,
    k: usize,
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    /// Create an empty table for `local_id`, holding up to `k` entries per
    /// bucket.
    pub fn new(local_id: NodeId, k: usize) -> Self {
        Self {
            local_id,
            k,
            buckets: (0..NUM_BUCKETS).map(|_| Bucket::default()).collect(),
        }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    /// Bucket index for `id`, or `None` if `id` is the local node itself.
    fn bucket_index(&self, id: &NodeId) -> Option<usize> {
        let distance = self.local_id.xor_distance(id);
        if distance == [0u8; 20] {
            return None;
        }
        Some(NodeId::log2int(&distance))
    }

    /// Insert or refresh `entry`. Self is never inserted. If an entry with
    /// the same ID already exists anywhere in the table it is removed
    /// first, so a re-insert becomes a move-to-most-recent. Otherwise, if
    /// the target bucket has room the entry is appended; if the bucket is
    /// full, the oldest entry (front of the list) is overwritten.
    pub fn insert(&mut self, entry: NodeInfo) {
        let Some(bucket_idx) = self.bucket_index(&entry.id) else {
            return;
        };

        self.remove(&entry.id);

        let bucket = &mut self.buckets[bucket_idx];
        if bucket.entries.len() < self.k {
            bucket.entries.push(entry);
        } else {
            bucket.entries.remove(0);
            bucket.entries.push(entry);
        }
    }

    /// Remove `id` from the table, if present.
    pub fn remove(&mut self, id: &NodeId) {
        let Some(bucket_idx) = self.bucket_index(id) else {
            return;
        };
        self.buckets[bucket_idx].entries.retain(|e| e.id != *id);
    }

    /// Look up `id` within its target bucket.
    pub fn find(&self, id: &NodeId) -> Option<NodeInfo> {
        let bucket_idx = self.bucket_index(id)?;
        self.buckets[bucket_idx]
            .entries
            .iter()
            .find(|e| e.id == *id)
            .cloned()
    }

    /// Return up to `n` entries nearest to `id`: the contents of `id`'s own
    /// bucket, expanding outward (`b±1, b±2, …`) until at least `n` entries
    /// are collected or the table is exhausted. The returned slice is the
    /// *last* `n` of the accumulated list (closest-first order is restored
    /// by the caller via a distance sort, same as the source).
    pub fn nearest(&self, id: NodeId, n: usize) -> Vec<NodeInfo> {
        let center = self.bucket_index(&id).unwrap_or(0) as isize;

        let mut collected: Vec<NodeInfo> = self.buckets[center as usize].entries.clone();
        let mut radius: isize = 1;
        while collected.len() < n {
            let lo = center - radius;
            let hi = center + radius;
            let mut added_any = false;
            if lo >= 0 {
                collected.extend(self.buckets[lo as usize].entries.iter().cloned());
                added_any = true;
            }
            if hi < NUM_BUCKETS as isize {
                collected.extend(self.buckets[hi as usize].entries.iter().cloned());
                added_any = true;
            }
            if !added_any {
                break;
            }
            radius += 1;
        }

        let start = collected.len().saturating_sub(n);
        let mut result: Vec<NodeInfo> = collected[start..].to_vec();
        result.sort_by_key(|e| e.id.xor_distance(&id));
        result
    }

    /// All entries currently held in the table.
    pub fn nodes(&self) -> Vec<NodeInfo> {
        self.buckets
            .iter()
            .flat_map(|b| b.entries.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// SHA-1(key), reinterpreted as a node digest, for `find-value` recursion
/// (§4.3). Namespace is taken from the local node, matching what the caller
/// treats the resulting pseudo-ID as: a point in the same keyspace.
pub fn key_digest(key: &str) -> Digest {
    use sha1::{Digest as _, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    let hash = hasher.finalize();
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ochra_types::identity::Namespace;
    use std::net::SocketAddr;

    fn node(ns: u8, digest_byte: u8) -> NodeInfo {
        let namespace: Namespace = [ns; 4];
        let digest: Digest = [digest_byte; 20];
        NodeInfo {
            id: NodeId::new(namespace, digest),
            addr: SocketAddr::from(([127, 0, 0, 1], 9200 + u16::from(digest_byte))),
        }
    }

    #[test]
    fn test_self_is_never_inserted() {
        let local = node(1, 0).id;
        let mut table = RoutingTable::new(local, 4);
        table.insert(NodeInfo {
            id: local,
            addr: "127.0.0.1:9200".parse().expect("addr"),
        });
        assert!(table.is_empty());
    }

    #[test]
    fn test_insert_and_find() {
        let local = node(1, 0).id;
        let mut table = RoutingTable::new(local, 4);
        let peer = node(1, 5);
        table.insert(peer.clone());
        assert_eq!(table.find(&peer.id), Some(peer));
    }

    #[test]
    fn test_reinsert_moves_to_back_without_duplication() {
        let local = node(1, 0).id;
        let mut table = RoutingTable::new(local, 4);
        let peer = node(1, 5);
        table.insert(peer.clone());
        table.insert(peer.clone());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_bucket_full_overwrites_oldest() {
        let local = node(1, 0).id;
        let mut table = RoutingTable::new(local, 2);
        // All three share a leading set bit in the first digest byte, so
        // they land in the same (highest) bucket regardless of the rest.
        let a = node(1, 0x80);
        let b = node(1, 0x81);
        let c = node(1, 0x82);
        table.insert(a.clone());
        table.insert(b.clone());
        table.insert(c.clone());
        assert_eq!(table.len(), 2);
        assert_eq!(table.find(&a.id), None);
        assert_eq!(table.find(&b.id), Some(b));
        assert_eq!(table.find(&c.id), Some(c));
    }

    #[test]
    fn test_remove() {
        let local = node(1, 0).id;
        let mut table = RoutingTable::new(local, 4);
        let peer = node(1, 5);
        table.insert(peer.clone());
        table.remove(&peer.id);
        assert_eq!(table.find(&peer.id), None);
    }

    #[test]
    fn test_nearest_returns_at_most_n_sorted() {
        let local = node(1, 0).id;
        let mut table = RoutingTable::new(local, 20);
        for i in 1..=10u8 {
            table.insert(node(1, i));
        }
        let target = node(1, 5).id;
        let nearest = table.nearest(target, 5);
        assert!(nearest.len() <= 5);
        for pair in nearest.windows(2) {
            let d0 = pair[0].id.xor_distance(&target);
            let d1 = pair[1].id.xor_distance(&target);
            assert!(d0 <= d1);
        }
    }

    #[test]
    fn test_nodes_and_len() {
        let local = node(1, 0).id;
        let mut table = RoutingTable::new(local, 4);
        assert!(table.is_empty());
        table.insert(node(1, 1));
        table.insert(node(1, 2));
        assert_eq!(table.len(), 2);
        assert_eq!(table.nodes().len(), 2);
    }

    #[test]
    fn test_key_digest_is_20_bytes_and_deterministic() {
        let d1 = key_digest("hello");
        let d2 = key_digest("hello");
        assert_eq!(d1.len(), 20);
        assert_eq!(d1, d2);
        assert_ne!(d1, key_digest("world"));
    }
}
