//! The DHT's local key/value store (§4.3 `store`/`find-value`).
//!
//! Plain string-to-string storage, no versioning or expiry — the spec's
//! `store`/`find-value` pair carries no sequence number or signature, unlike
//! the source's BEP44 mutable-record scheme, which this store intentionally
//! does not reproduce.

use std::collections::HashMap;

use tokio::sync::RwLock;

/// A namespace-scoped DHT instance's local key/value store.
#[derive(Default)]
pub struct KvStore {
    entries: RwLock<HashMap<String, String>>,
}

impl KvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn put(&self, key: String, value: String) {
        self.entries.write().await.insert(key, value);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get() {
        let store = KvStore::new();
        store.put("hello".to_string(), "world".to_string()).await;
        assert_eq!(store.get("hello").await, Some("world".to_string()));
    }

    #[tokio::test]
    async fn test_missing_key_returns_none() {
        let store = KvStore::new();
        assert_eq!(store.get("missing").await, None);
    }

    #[tokio::test]
    async fn test_overwrite() {
        let store = KvStore::new();
        store.put("k".to_string(), "v1".to_string()).await;
        store.put("k".to_string(), "v2".to_string()).await;
        assert_eq!(store.get("k").await, Some("v2".to_string()));
    }

    #[tokio::test]
    async fn test_len_and_is_empty() {
        let store = KvStore::new();
        assert!(store.is_empty().await);
        store.put("a".to_string(), "1".to_string()).await;
        assert_eq!(store.len().await, 1);
        assert!(!store.is_empty().await);
    }
}
