use bitcoin::Network;
use serde::{Deserialize, Serialize};

/// Default Esplora endpoint for Bitcoin mainnet.
pub const MAINNET_RPC: &str = "https://blockstream.info/api";

/// Default Esplora endpoint for Bitcoin testnet.
pub const TESTNET_RPC: &str = "https://blockstream.info/testnet/api";

/// Bitcoin networks the wallet keeps a ledger for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BtcNetwork {
    Mainnet,
    Testnet,
}

impl BtcNetwork {
    pub const ALL: [BtcNetwork; 2] = [BtcNetwork::Mainnet, BtcNetwork::Testnet];

    /// Convert to the `bitcoin` crate's `Network` type.
    pub fn to_bitcoin_network(self) -> Network {
        match self {
            BtcNetwork::Mainnet => Network::Bitcoin,
            BtcNetwork::Testnet => Network::Testnet,
        }
    }

    pub fn is_testnet(self) -> bool {
        matches!(self, BtcNetwork::Testnet)
    }

    /// Return the default RPC endpoint for this network.
    pub fn default_rpc_url(self) -> &'static str {
        match self {
            BtcNetwork::Mainnet => MAINNET_RPC,
            BtcNetwork::Testnet => TESTNET_RPC,
        }
    }
}

impl std::fmt::Display for BtcNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BtcNetwork::Mainnet => write!(f, "mainnet"),
            BtcNetwork::Testnet => write!(f, "testnet"),
        }
    }
}
