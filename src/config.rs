//! Runtime configuration for both roles.
//!
//! Values start from `Default`, are overridden by `DFS_*` environment variables and
//! finally by command-line flags parsed in `main.rs`.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    pub bind_addr: SocketAddr,
    pub block_size: usize,
    /// Per-call timeout for every request the balancer sends to a node.
    pub node_timeout_ms: u64,
    pub node_retry_attempts: usize,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7000)),
            block_size: DEFAULT_BLOCK_SIZE,
            node_timeout_ms: 2000,
            node_retry_attempts: 3,
        }
    }
}

impl BalancerConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(block_size) = env_parse::<usize>("DFS_BLOCK_SIZE")? {
            config.block_size = block_size;
        }
        if let Some(timeout) = env_parse::<u64>("DFS_NODE_TIMEOUT_MS")? {
            config.node_timeout_ms = timeout;
        }
        if let Some(attempts) = env_parse::<usize>("DFS_NODE_RETRIES")? {
            config.node_retry_attempts = attempts;
        }
        Ok(config)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.node_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(StoreError::InvalidConfig(
                "block_size must be greater than zero".to_string(),
            ));
        }
        if self.node_retry_attempts == 0 {
            return Err(StoreError::InvalidConfig(
                "node_retry_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub bind_addr: SocketAddr,
    /// Parent of every node's data directory.
    pub root_path: PathBuf,
    pub node_name: String,
    pub balancer_url: String,
    /// Address the balancer uses to reach this node.
    pub advertised_url: String,
    /// Wipe the data directory at startup instead of rebuilding the catalog from it.
    pub clear_on_start: bool,
    pub registration_attempts: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let bind_addr = SocketAddr::from(([127, 0, 0, 1], 7100));
        Self {
            bind_addr,
            root_path: PathBuf::from("./dfs_data"),
            node_name: format!("node-{}", bind_addr.port()),
            balancer_url: "http://127.0.0.1:7000".to_string(),
            advertised_url: format!("http://{}", bind_addr),
            clear_on_start: true,
            registration_attempts: 5,
        }
    }
}

impl NodeConfig {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(root) = std::env::var("DFS_ROOT") {
            config.root_path = PathBuf::from(root);
        }
        if let Ok(name) = std::env::var("DFS_NODE_NAME") {
            config.node_name = name;
        }
        if let Ok(url) = std::env::var("DFS_BALANCER_URL") {
            config.balancer_url = url;
        }
        if let Ok(url) = std::env::var("DFS_ADVERTISE_URL") {
            config.advertised_url = url;
        }
        if let Some(keep) = env_parse::<bool>("DFS_KEEP_DATA")? {
            config.clear_on_start = !keep;
        }
        Ok(config)
    }

    /// Rebinds the node, keeping derived defaults (name, advertised url) in step
    /// unless they were set explicitly.
    pub fn with_bind_addr(mut self, bind_addr: SocketAddr) -> Self {
        let defaults = Self::default();
        if self.node_name == defaults.node_name {
            self.node_name = format!("node-{}", bind_addr.port());
        }
        if self.advertised_url == defaults.advertised_url {
            self.advertised_url = format!("http://{}", bind_addr);
        }
        self.bind_addr = bind_addr;
        self
    }

    /// `<root>/<node_name>`, the directory that holds one sub-directory per file.
    pub fn data_path(&self) -> PathBuf {
        self.root_path.join(&self.node_name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.balancer_url.trim().is_empty() {
            return Err(StoreError::InvalidConfig(
                "balancer_url must not be empty".to_string(),
            ));
        }
        if self.node_name.is_empty() || self.node_name.contains(['/', '\\']) {
            return Err(StoreError::InvalidConfig(format!(
                "invalid node name {:?}",
                self.node_name
            )));
        }
        Ok(())
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| StoreError::InvalidConfig(format!("{}: {}", key, e))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balancer_defaults_are_valid() {
        let config = BalancerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.block_size, DEFAULT_BLOCK_SIZE);
        assert_eq!(config.node_timeout(), Duration::from_millis(2000));
    }

    #[test]
    fn test_zero_block_size_fails_fast() {
        let config = BalancerConfig {
            block_size: 0,
            ..BalancerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(StoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_node_data_path_joins_root_and_name() {
        let config = NodeConfig {
            root_path: PathBuf::from("/srv/dfs"),
            node_name: "node-a".to_string(),
            ..NodeConfig::default()
        };
        assert_eq!(config.data_path(), PathBuf::from("/srv/dfs/node-a"));
    }

    #[test]
    fn test_with_bind_addr_updates_derived_defaults() {
        let addr: SocketAddr = "127.0.0.1:7205".parse().unwrap();
        let config = NodeConfig::default().with_bind_addr(addr);

        assert_eq!(config.node_name, "node-7205");
        assert_eq!(config.advertised_url, "http://127.0.0.1:7205");
    }

    #[test]
    fn test_with_bind_addr_keeps_explicit_values() {
        let addr: SocketAddr = "127.0.0.1:7205".parse().unwrap();
        let config = NodeConfig {
            node_name: "storage-east".to_string(),
            advertised_url: "http://10.0.0.5:7205".to_string(),
            ..NodeConfig::default()
        }
        .with_bind_addr(addr);

        assert_eq!(config.node_name, "storage-east");
        assert_eq!(config.advertised_url, "http://10.0.0.5:7205");
    }

    #[test]
    fn test_node_validate_rejects_empty_balancer() {
        let config = NodeConfig {
            balancer_url: " ".to_string(),
            ..NodeConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
