//! Configuration file management.
//!
//! TOML file at a platform default data directory, overridable by the
//! `OCHRA_DATA_DIR` environment variable. Sections are `[network]`,
//! `[identity]`, `[advanced]` only — there is no storage/earning/privacy
//! section, since this daemon has no corresponding feature to configure.

use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use ochra_dht::bootstrap::SeedNode;
use ochra_types::identity::Namespace;

/// Complete daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub advanced: AdvancedConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Interface to bind the QUIC/DHT port pair on.
    #[serde(default = "default_bind_host")]
    pub bind_host: IpAddr,
    /// Inclusive port range to search for a free port pair (§6 "port
    /// selection (9200-9210, first available)").
    #[serde(default = "default_port_range")]
    pub port_range: (u16, u16),
    /// The namespace this daemon's identity joins on startup.
    #[serde(default)]
    pub namespace: Namespace,
    /// Bootstrap seed entries (host + port range).
    #[serde(default)]
    pub bootstrap_nodes: Vec<SeedNode>,
}

/// Identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Private-key PEM file path. Empty = `$data_dir/identity.pem`.
    #[serde(default)]
    pub key_file: String,
}

/// Advanced configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Log level: "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log file path. Empty = stderr.
    #[serde(default)]
    pub log_file: String,
}

fn default_bind_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port_range() -> (u16, u16) {
    (9200, 9210)
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            port_range: default_port_range(),
            namespace: [0u8; 4],
            bootstrap_nodes: Vec::new(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            key_file: String::new(),
        }
    }
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_file: String::new(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            identity: IdentityConfig::default(),
            advanced: AdvancedConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default config file location, falling
    /// back to defaults if the file does not exist.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: DaemonConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// The private-key PEM file path, resolved against the data directory
    /// when `identity.key_file` is left empty.
    pub fn key_file(&self) -> PathBuf {
        if self.identity.key_file.is_empty() {
            Self::data_dir().join("identity.pem")
        } else {
            PathBuf::from(&self.identity.key_file)
        }
    }

    pub fn data_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("OCHRA_DATA_DIR") {
            return PathBuf::from(dir);
        }
        #[cfg(target_os = "macos")]
        {
            dirs_fallback("Library/Application Support/Ochra")
        }
        #[cfg(target_os = "linux")]
        {
            dirs_fallback(".ochra")
        }
        #[cfg(target_os = "windows")]
        {
            dirs_fallback("Ochra")
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            dirs_fallback(".ochra")
        }
    }

    fn config_path() -> PathBuf {
        Self::data_dir().join("config.toml")
    }
}

/// Fallback home directory resolution.
fn dirs_fallback(subpath: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(subpath))
        .unwrap_or_else(|_| PathBuf::from("/tmp/ochra"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert_eq!(config.network.port_range, (9200, 9210));
        assert_eq!(config.advanced.log_level, "info");
        assert!(config.network.bootstrap_nodes.is_empty());
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = DaemonConfig::default();
        let toml_str = toml::to_string(&config).expect("serialize");
        let parsed: DaemonConfig = toml::from_str(&toml_str).expect("parse");
        assert_eq!(parsed.network.port_range, config.network.port_range);
    }

    #[test]
    fn test_key_file_defaults_under_data_dir() {
        std::env::set_var("OCHRA_DATA_DIR", "/tmp/ochra-test-config");
        let config = DaemonConfig::default();
        assert_eq!(
            config.key_file(),
            PathBuf::from("/tmp/ochra-test-config/identity.pem")
        );
        std::env::remove_var("OCHRA_DATA_DIR");
    }
}
