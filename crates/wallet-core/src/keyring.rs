//! Keyring contract: the wallet never sees private keys.

use async_trait::async_trait;
use chain_btc::types::KeyId;
use chain_btc::BtcNetwork;
use serde::{Deserialize, Serialize};

/// A Bitcoin account: one BIP-84 account index on one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId {
    pub network: BtcNetwork,
    pub account_index: u32,
}

impl AccountId {
    pub fn new(network: BtcNetwork, account_index: u32) -> Self {
        Self {
            network,
            account_index,
        }
    }

    pub fn is_testnet(&self) -> bool {
        self.network.is_testnet()
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.account_index)
    }
}

/// An address owned by an account together with the key that controls it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitcoinAddress {
    pub address_string: String,
    pub key_id: KeyId,
}

/// Address listing, public keys and digest signing for Bitcoin accounts.
/// `None` means the keyring cannot serve the request.
#[async_trait]
pub trait Keyring: Send + Sync {
    /// All addresses the account has handed out, receive and change.
    async fn addresses(&self, account: &AccountId) -> Option<Vec<BitcoinAddress>>;

    async fn address(&self, account: &AccountId, key_id: KeyId) -> Option<BitcoinAddress>;

    /// 33-byte compressed public key.
    async fn pubkey(&self, account: &AccountId, key_id: KeyId) -> Option<Vec<u8>>;

    /// Signature over a 32-byte digest, without a sighash byte.
    async fn sign_digest(
        &self,
        account: &AccountId,
        key_id: KeyId,
        digest: &[u8; 32],
    ) -> Option<Vec<u8>>;
}
