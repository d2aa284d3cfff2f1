//! ochra-daemon: the overlay network daemon.
//!
//! Single OS process running a Tokio async runtime. Loads or generates its
//! identity key, binds a [`Router`] on the configured port range, bootstraps
//! into its home namespace's DHT, and runs until shutdown.

mod config;

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{error, info};

use ochra_crypto::identity::PrivateKey;
use ochra_crypto::pem;
use ochra_dht::bootstrap::{self, BootstrapConfig};
use ochra_router::{Router, RouterConfig};

use crate::config::DaemonConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = DaemonConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("ochra={}", config.advanced.log_level).into()),
        )
        .init();

    info!("ochra daemon starting");

    let data_dir = DaemonConfig::data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let self_key = load_or_generate_identity(&config)?;
    info!(
        digest = %hex::encode(self_key.public_key().digest()),
        "identity loaded"
    );

    let router = Router::bind(
        self_key,
        RouterConfig {
            bind_host: config.network.bind_host,
            port_range: config.network.port_range,
            handshake_timeout: ochra_transport::session::DEFAULT_HANDSHAKE_TIMEOUT,
            home_namespace: config.network.namespace,
        },
    )
    .await?;

    info!(addr = %router.local_addr(), "router bound");

    if !config.network.bootstrap_nodes.is_empty() {
        let dht = router.dht(config.network.namespace).await;
        let bootstrap_config = BootstrapConfig::new(config.network.bootstrap_nodes.clone());
        match bootstrap::bootstrap(&dht, &bootstrap_config).await {
            Ok(result) => info!(
                responsive_seeds = result.responsive_seeds,
                peers_discovered = result.peers_discovered,
                "bootstrap complete"
            ),
            Err(e) => error!(error = %e, "bootstrap failed, continuing standalone"),
        }
    } else {
        info!("no bootstrap seeds configured, running standalone");
    }

    let facade = ochra_facade::Facade::new(Arc::clone(&router));

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
    let _keep_alive = shutdown_tx.clone();

    tokio::select! {
        _ = shutdown_rx.recv() => {
            info!("shutdown signal received");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
        }
    }

    facade.close();
    info!("daemon stopped");
    Ok(())
}

/// Load the identity private key from `config`'s key file, generating and
/// persisting a new one on first run.
fn load_or_generate_identity(config: &DaemonConfig) -> anyhow::Result<PrivateKey> {
    let key_path = config.key_file();
    if key_path.exists() {
        let text = std::fs::read_to_string(&key_path)?;
        Ok(pem::decode(&text)?)
    } else {
        let key = PrivateKey::generate();
        let text = pem::encode(&key)?;
        if let Some(parent) = key_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&key_path, text)?;
        info!(path = %key_path.display(), "generated new identity key");
        Ok(key)
    }
}
