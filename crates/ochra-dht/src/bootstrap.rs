//! Joining a DHT namespace from a configured list of seed nodes (§4.3
//! `discover`/bootstrap).
//!
//! Seeds are `host:port-range` entries rather than pinned peer identities —
//! unlike a session peer, a DHT seed's node ID isn't known in advance and is
//! simply learned from whichever address in the range answers a ping.
//!
//! The process:
//!
//! 1. Ping every address in every seed's port range (with retries).
//! 2. Add each responsive seed to the routing table.
//! 3. Perform an iterative `find-node` for our own ID to discover the rest
//!    of the namespace.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::rpc::Dht;
use crate::{DhtError, Result};

/// Configuration for the DHT bootstrap process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Seed nodes to contact initially.
    pub seed_nodes: Vec<SeedNode>,
    /// Maximum number of ping attempts per address.
    pub max_retries: u32,
    /// Minimum number of responsive seeds required for bootstrap to succeed.
    pub min_responsive_seeds: usize,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            seed_nodes: Vec::new(),
            max_retries: 3,
            min_responsive_seeds: 1,
        }
    }
}

impl BootstrapConfig {
    pub fn new(seed_nodes: Vec<SeedNode>) -> Self {
        Self {
            seed_nodes,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.seed_nodes.is_empty() {
            return Err(DhtError::BootstrapFailed(
                "no seed nodes configured".to_string(),
            ));
        }
        let total_addrs: usize = self.seed_nodes.iter().map(SeedNode::address_count).sum();
        if self.min_responsive_seeds > total_addrs {
            return Err(DhtError::BootstrapFailed(format!(
                "min_responsive_seeds ({}) exceeds total configured addresses ({})",
                self.min_responsive_seeds, total_addrs,
            )));
        }
        Ok(())
    }
}

/// A `host:port-range` seed entry. `port_end` is inclusive.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeedNode {
    pub host: IpAddr,
    pub port_start: u16,
    pub port_end: u16,
}

impl SeedNode {
    pub fn single(host: IpAddr, port: u16) -> Self {
        Self {
            host,
            port_start: port,
            port_end: port,
        }
    }

    fn address_count(&self) -> usize {
        usize::from(self.port_end.saturating_sub(self.port_start)) + 1
    }

    fn addresses(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        (self.port_start..=self.port_end).map(|port| SocketAddr::new(self.host, port))
    }
}

/// The outcome of a bootstrap attempt.
#[derive(Clone, Debug)]
pub struct BootstrapResult {
    pub responsive_seeds: usize,
    pub peers_discovered: usize,
    pub success: bool,
}

/// Bootstrap `dht` from `config`'s seed nodes, then discover the rest of
/// the namespace via a self-lookup.
pub async fn bootstrap(dht: &Arc<Dht>, config: &BootstrapConfig) -> Result<BootstrapResult> {
    config.validate()?;

    info!(
        seed_count = config.seed_nodes.len(),
        "starting DHT bootstrap"
    );

    let mut responsive_seeds = 0usize;

    for seed in &config.seed_nodes {
        for addr in seed.addresses() {
            let mut responded = false;
            for attempt in 0..config.max_retries {
                debug!(%addr, attempt = attempt + 1, "pinging seed address");
                match dht.ping(addr).await {
                    Ok(()) => {
                        responded = true;
                        break;
                    }
                    Err(e) => {
                        warn!(%addr, attempt = attempt + 1, error = %e, "seed ping failed");
                    }
                }
            }
            if responded {
                responsive_seeds += 1;
                info!(%addr, "seed address responded");
            }
        }
    }

    if responsive_seeds < config.min_responsive_seeds {
        return Err(DhtError::BootstrapFailed(format!(
            "only {} of {} required seed addresses responded",
            responsive_seeds, config.min_responsive_seeds,
        )));
    }

    let before = dht.table_len().await;
    let _ = dht.find_nearest_node(dht.self_id()).await;
    let after = dht.table_len().await;
    let peers_discovered = after.saturating_sub(before);

    let result = BootstrapResult {
        responsive_seeds,
        peers_discovered,
        success: true,
    };

    info!(
        responsive_seeds = result.responsive_seeds,
        peers_discovered = result.peers_discovered,
        "bootstrap complete"
    );

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bootstrap_config_default() {
        let config = BootstrapConfig::default();
        assert!(config.seed_nodes.is_empty());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.min_responsive_seeds, 1);
    }

    #[test]
    fn test_bootstrap_config_validate_no_seeds() {
        let config = BootstrapConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bootstrap_config_validate_min_exceeds_total() {
        let config = BootstrapConfig {
            seed_nodes: vec![SeedNode::single("127.0.0.1".parse().expect("ip"), 4433)],
            min_responsive_seeds: 5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bootstrap_config_validate_ok_with_port_range() {
        let config = BootstrapConfig {
            seed_nodes: vec![SeedNode {
                host: "127.0.0.1".parse().expect("ip"),
                port_start: 4433,
                port_end: 4435,
            }],
            min_responsive_seeds: 2,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_seed_node_addresses_enumerates_range() {
        let seed = SeedNode {
            host: "127.0.0.1".parse().expect("ip"),
            port_start: 9000,
            port_end: 9002,
        };
        let addrs: Vec<SocketAddr> = seed.addresses().collect();
        assert_eq!(addrs.len(), 3);
        assert_eq!(addrs[0].port(), 9000);
        assert_eq!(addrs[2].port(), 9002);
    }

    #[test]
    fn test_bootstrap_result_fields() {
        let result = BootstrapResult {
            responsive_seeds: 2,
            peers_discovered: 15,
            success: true,
        };
        assert_eq!(result.responsive_seeds, 2);
        assert_eq!(result.peers_discovered, 15);
        assert!(result.success);
    }
}
