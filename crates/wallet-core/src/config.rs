use std::time::Duration;

use chain_btc::network::{MAINNET_RPC, TESTNET_RPC};
use chain_btc::BtcNetwork;
use serde::{Deserialize, Serialize};

use crate::error::WalletError;

/// Seconds between chain height polls.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Wallet service settings. Every field is optional in JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    pub mainnet_rpc_url: String,
    pub testnet_rpc_url: String,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            mainnet_rpc_url: MAINNET_RPC.to_string(),
            testnet_rpc_url: TESTNET_RPC.to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl WalletConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, WalletError> {
        let config: WalletConfig =
            serde_json::from_str(json).map_err(|e| WalletError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), WalletError> {
        if self.poll_interval_secs == 0 {
            return Err(WalletError::InvalidConfig(
                "poll_interval_secs must be positive".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(WalletError::InvalidConfig(
                "request_timeout_secs must be positive".into(),
            ));
        }
        for network in BtcNetwork::ALL {
            if self.rpc_url(network).is_empty() {
                return Err(WalletError::InvalidConfig(format!(
                    "missing rpc url for {network}"
                )));
            }
        }
        Ok(())
    }

    /// Base URL without a trailing slash.
    pub fn rpc_url(&self, network: BtcNetwork) -> &str {
        let url = match network {
            BtcNetwork::Mainnet => &self.mainnet_rpc_url,
            BtcNetwork::Testnet => &self.testnet_rpc_url,
        };
        url.trim_end_matches('/')
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
