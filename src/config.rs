// Node configuration

use crate::consensus::DEFAULT_DIFFICULTY;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_NODE_ID: &str = "3000";
pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_BOOTSTRAP: &str = "localhost:3000";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Node id must be a port number, got {0:?}")]
    InvalidNodeId(String),
    #[error("Bootstrap address must be host:port, got {0:?}")]
    InvalidBootstrap(String),
    #[error("Timeout {0} must be non-zero")]
    ZeroTimeout(&'static str),
    #[error("Difficulty must be between 1 and 255, got {0}")]
    InvalidDifficulty(u32),
    #[error("Host must not be empty")]
    EmptyHost,
}

/// Settings shared by the CLI and the node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Port this node listens on; also keys its data files
    pub node_id: String,
    pub data_dir: PathBuf,
    /// Primary node every other node announces itself to
    pub bootstrap: String,
    /// Host part of this node's advertised address
    pub host: String,
    pub difficulty: u32,
    /// Reward address when mining is enabled
    pub miner_address: Option<String>,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub mining_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: DEFAULT_NODE_ID.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            bootstrap: DEFAULT_BOOTSTRAP.to_string(),
            host: "localhost".to_string(),
            difficulty: DEFAULT_DIFFICULTY,
            miner_address: None,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            mining_timeout: Duration::from_secs(600),
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.parse::<u16>().is_err() {
            return Err(ConfigError::InvalidNodeId(self.node_id.clone()));
        }

        if self.host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if !(1..=255).contains(&self.difficulty) {
            return Err(ConfigError::InvalidDifficulty(self.difficulty));
        }

        let port_ok = self
            .bootstrap
            .rsplit_once(':')
            .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
        if !port_ok {
            return Err(ConfigError::InvalidBootstrap(self.bootstrap.clone()));
        }

        for (name, timeout) in [
            ("connect_timeout", self.connect_timeout),
            ("read_timeout", self.read_timeout),
            ("mining_timeout", self.mining_timeout),
        ] {
            if timeout.is_zero() {
                return Err(ConfigError::ZeroTimeout(name));
            }
        }

        Ok(())
    }

    /// Address peers use to reach this node
    pub fn node_address(&self) -> String {
        format!("{}:{}", self.host, self.node_id)
    }

    /// Whether this node is the primary (bootstrap) node
    pub fn is_primary(&self) -> bool {
        self.node_address() == self.bootstrap
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(format!("blocks_{}", self.node_id))
    }

    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir.join(format!("wallets_{}.json", self.node_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.db_path(), PathBuf::from("./data/blocks_3000"));
        assert_eq!(config.wallet_path(), PathBuf::from("./data/wallets_3000.json"));
        assert!(config.is_primary());
    }

    #[test]
    fn test_non_primary_node() {
        let config = NodeConfig {
            node_id: "3001".to_string(),
            ..Default::default()
        };
        assert_eq!(config.node_address(), "localhost:3001");
        assert!(!config.is_primary());
    }

    #[test]
    fn test_validation_errors() {
        let bad_id = NodeConfig {
            node_id: "abc".to_string(),
            ..Default::default()
        };
        assert_eq!(bad_id.validate(), Err(ConfigError::InvalidNodeId("abc".to_string())));

        let bad_bootstrap = NodeConfig {
            bootstrap: "localhost".to_string(),
            ..Default::default()
        };
        assert!(matches!(bad_bootstrap.validate(), Err(ConfigError::InvalidBootstrap(_))));

        let zero = NodeConfig {
            mining_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(zero.validate(), Err(ConfigError::ZeroTimeout("mining_timeout")));

        let hard = NodeConfig {
            difficulty: 256,
            ..Default::default()
        };
        assert_eq!(hard.validate(), Err(ConfigError::InvalidDifficulty(256)));
    }
}
