// node/src/config.rs
use chain_sync::{NodeAddress, PeerId, SyncConfig};
use ledger_core::ChainId;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub data_dir: String,
    pub chain_id: ChainId,
    pub network: NetworkConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub listen_addr: SocketAddr,
    pub max_peers: usize,
    /// `node://<peer-id-hex>@<ip>:<tcp_port>` URLs
    pub bootstrap_peers: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".into(),
            chain_id: 1,
            network: NetworkConfig {
                listen_addr: SocketAddr::from(([0, 0, 0, 0], 30303)),
                max_peers: 50,
                bootstrap_peers: vec![],
            },
            sync: SyncConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Sync tunables bound to this node's chain id
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            chain_id: self.chain_id,
            ..self.sync.clone()
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sync.fragment_length == 0 {
            anyhow::bail!("sync.fragment_length must be at least 1");
        }
        if self.sync.block_batch_size == 0 {
            anyhow::bail!("sync.block_batch_size must be at least 1");
        }
        if self.sync.max_window_leaves == 0 {
            anyhow::bail!("sync.max_window_leaves must be at least 1");
        }
        if self.sync.max_concurrent_chain_requests == 0 {
            anyhow::bail!("sync.max_concurrent_chain_requests must be at least 1");
        }
        if self.network.bootstrap_peers.len() > self.network.max_peers {
            anyhow::bail!(
                "{} bootstrap peers exceed network.max_peers = {}",
                self.network.bootstrap_peers.len(),
                self.network.max_peers
            );
        }
        self.bootstrap_nodes()?;
        Ok(())
    }

    /// Bootstrap peers with their addresses. The UDP port is taken to be the TCP port.
    pub fn bootstrap_nodes(&self) -> anyhow::Result<Vec<(PeerId, NodeAddress)>> {
        self.network
            .bootstrap_peers
            .iter()
            .map(|url| parse_node_url(url))
            .collect()
    }
}

pub fn parse_node_url(url: &str) -> anyhow::Result<(PeerId, NodeAddress)> {
    let rest = url
        .strip_prefix("node://")
        .ok_or_else(|| anyhow::anyhow!("{} is not a node:// url", url))?;
    let (id, socket) = rest
        .split_once('@')
        .ok_or_else(|| anyhow::anyhow!("{} has no peer id", url))?;

    let peer = PeerId::from_hex(id).ok_or_else(|| anyhow::anyhow!("invalid peer id in {}", url))?;
    let socket: SocketAddr = socket.parse()?;
    Ok((peer, NodeAddress::new(socket.ip(), socket.port(), socket.port())))
}
