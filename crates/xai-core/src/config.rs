use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{CHECKPOINT_INTERVAL, MEMPOOL_MAX};
use crate::error::XaiError;

// ── NetworkType ──────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Mainnet,
    Testnet,
}

impl NetworkType {
    pub fn address_prefix(self) -> &'static str {
        match self {
            NetworkType::Mainnet => "XAI",
            NetworkType::Testnet => "TXAI",
        }
    }

    /// Reserved trade-fee sink address for this network.
    pub fn tradefee_address(self) -> &'static str {
        match self {
            NetworkType::Mainnet => "XAITRADEFEE",
            NetworkType::Testnet => "TXAITRADEFEE",
        }
    }
}

impl FromStr for NetworkType {
    type Err = XaiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(NetworkType::Mainnet),
            "testnet" => Ok(NetworkType::Testnet),
            other => Err(XaiError::ConfigError(format!(
                "unknown network type {other:?} (expected mainnet or testnet)"
            ))),
        }
    }
}

// ── NodeConfig ───────────────────────────────────────────────────────────────

/// Startup configuration. Every option has a default; unknown options in a
/// config file fail loudly at parse time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct NodeConfig {
    /// Root directory for blocks, state snapshot, and checkpoints.
    pub data_dir: PathBuf,

    /// Selects the address prefix and seeds the genesis block.
    pub network_type: NetworkType,

    /// Cap mining difficulty at `max_test_mining_difficulty` (test mode).
    pub fast_mining_enabled: bool,

    pub max_test_mining_difficulty: u32,

    /// Mempool capacity in transactions.
    pub mempool_max_size: usize,

    /// Blocks between checkpoints.
    pub checkpoint_interval: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./xai-data"),
            network_type: NetworkType::Mainnet,
            fast_mining_enabled: false,
            max_test_mining_difficulty: 2,
            mempool_max_size: MEMPOOL_MAX,
            checkpoint_interval: CHECKPOINT_INTERVAL,
        }
    }
}

impl NodeConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, XaiError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            XaiError::ConfigError(format!("reading {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| XaiError::ConfigError(format!("parsing {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_documented_values() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.network_type, NetworkType::Mainnet);
        assert_eq!(cfg.mempool_max_size, MEMPOOL_MAX);
        assert_eq!(cfg.checkpoint_interval, CHECKPOINT_INTERVAL);
        assert!(!cfg.fast_mining_enabled);
    }

    #[test]
    fn unknown_option_fails_loudly() {
        let raw = r#"{"network_type":"testnet","turbo_mode":true}"#;
        let parsed: Result<NodeConfig, _> = serde_json::from_str(raw);
        assert!(parsed.is_err());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let raw = r#"{"network_type":"testnet"}"#;
        let cfg: NodeConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.network_type, NetworkType::Testnet);
        assert_eq!(cfg.mempool_max_size, MEMPOOL_MAX);
    }
}
