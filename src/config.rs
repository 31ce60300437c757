use std::time::Duration;

use clap::Parser;
use thiserror::Error;

use crate::blockchain::peers::{normalize_address, PeerError};
use crate::blockchain::pow::DEFAULT_DIFFICULTY_PREFIX;
use crate::blockchain::{Address, NodeSettings, ProofOfWork};

/// Errors raised while turning the configuration into node settings
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid advertised address: {0}")]
    InvalidAdvertise(#[from] PeerError),

    #[error("Mining reward must be a finite, non-negative number, got {0}")]
    InvalidMiningReward(f64),

    #[error("Difficulty prefix must be non-empty lowercase hex, got {0:?}")]
    InvalidDifficultyPrefix(String),
}

/// Command line and environment configuration of a node
#[derive(Debug, Clone, Parser)]
#[command(name = "ledger_node", version, about = "Proof-of-work ledger node")]
pub struct NodeConfig {
    /// Host to bind the HTTP server to
    #[arg(long, env = "NODE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind the HTTP server to
    #[arg(long, env = "NODE_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Address credited with mining rewards
    #[arg(long, env = "NODE_REWARD_ADDRESS")]
    pub reward_address: String,

    /// URL of an active node to register with at start-up
    #[arg(long, env = "NODE_BOOTSTRAP")]
    pub bootstrap: Option<String>,

    /// URL this node announces to peers [default: http://<host>:<port>]
    #[arg(long, env = "NODE_ADVERTISE")]
    pub advertise: Option<String>,

    /// Hex prefix every proof of work hash must start with
    #[arg(long, env = "NODE_DIFFICULTY_PREFIX", default_value = DEFAULT_DIFFICULTY_PREFIX)]
    pub difficulty_prefix: String,

    /// Amount minted per mined block
    #[arg(long, env = "NODE_MINING_REWARD", default_value_t = 1.0)]
    pub mining_reward: f64,

    /// Timeout for every call to a peer, in seconds
    #[arg(long, env = "NODE_PEER_TIMEOUT_SECS", default_value_t = 5)]
    pub peer_timeout_secs: u64,
}

impl NodeConfig {
    /// The URL announced to peers
    pub fn advertise_url(&self) -> String {
        self.advertise
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }

    /// Validates the configuration and builds the settings the node runs with
    ///
    /// Digests are lowercase hex, so any other prefix character is rejected up
    /// front, as is a negative or non-finite reward.
    pub fn node_settings(&self) -> Result<NodeSettings, ConfigError> {
        if !self.mining_reward.is_finite() || self.mining_reward < 0.0 {
            return Err(ConfigError::InvalidMiningReward(self.mining_reward));
        }

        let prefix = &self.difficulty_prefix;
        if prefix.is_empty() || !prefix.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
            return Err(ConfigError::InvalidDifficultyPrefix(prefix.clone()));
        }

        Ok(NodeSettings {
            pow: ProofOfWork::new(self.difficulty_prefix.clone()),
            mining_reward: self.mining_reward,
            reward_address: Address(self.reward_address.clone()),
            self_address: Some(normalize_address(&self.advertise_url())?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NodeConfig::try_parse_from(["ledger_node", "--reward-address", "R"]).unwrap();

        assert_eq!(config.port, 5000);
        assert_eq!(config.advertise_url(), "http://127.0.0.1:5000");
        assert_eq!(config.peer_timeout(), Duration::from_secs(5));

        let settings = config.node_settings().unwrap();
        assert_eq!(settings.pow, ProofOfWork::new("0000"));
        assert_eq!(settings.mining_reward, 1.0);
        assert_eq!(settings.self_address.as_deref(), Some("127.0.0.1:5000"));
    }

    #[test]
    fn test_overrides() {
        let config = NodeConfig::try_parse_from([
            "ledger_node",
            "--reward-address",
            "R",
            "--port",
            "5001",
            "--advertise",
            "http://node-b:5001",
            "--difficulty-prefix",
            "00",
        ])
        .unwrap();

        let settings = config.node_settings().unwrap();
        assert_eq!(settings.self_address.as_deref(), Some("node-b:5001"));
        assert_eq!(settings.pow, ProofOfWork::new("00"));
    }

    #[test]
    fn test_reward_address_required() {
        assert!(NodeConfig::try_parse_from(["ledger_node"]).is_err());
    }

    #[test]
    fn test_rejects_unusable_mining_reward() {
        for reward in ["--mining-reward=-1", "--mining-reward=NaN", "--mining-reward=inf"] {
            let config = NodeConfig::try_parse_from(["ledger_node", "--reward-address", "R", reward]).unwrap();
            assert!(
                matches!(config.node_settings(), Err(ConfigError::InvalidMiningReward(_))),
                "{} should be rejected",
                reward
            );
        }

        let config = NodeConfig::try_parse_from(["ledger_node", "--reward-address", "R", "--mining-reward", "0"]).unwrap();
        assert_eq!(config.node_settings().unwrap().mining_reward, 0.0);
    }

    #[test]
    fn test_rejects_unreachable_difficulty_prefix() {
        for prefix in ["ABCD", "00g", ""] {
            let config =
                NodeConfig::try_parse_from(["ledger_node", "--reward-address", "R", "--difficulty-prefix", prefix])
                    .unwrap();
            match config.node_settings() {
                Err(ConfigError::InvalidDifficultyPrefix(rejected)) => assert_eq!(rejected, prefix),
                other => panic!("{:?} should be rejected, got {:?}", prefix, other),
            }
        }

        let config =
            NodeConfig::try_parse_from(["ledger_node", "--reward-address", "R", "--difficulty-prefix", "0ab"]).unwrap();
        assert!(config.node_settings().is_ok());
    }

    #[test]
    fn test_rejects_bad_advertise_url() {
        let config =
            NodeConfig::try_parse_from(["ledger_node", "--reward-address", "R", "--advertise", "node-b:5001"]).unwrap();
        assert!(matches!(config.node_settings(), Err(ConfigError::InvalidAdvertise(_))));
    }
}
