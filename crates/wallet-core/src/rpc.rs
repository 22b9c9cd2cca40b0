//! Chain-indexing RPC contract.

use async_trait::async_trait;
use chain_btc::types::{Transaction, Txid};
use chain_btc::BtcNetwork;
use thiserror::Error;

/// Error text returned by an RPC backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct RpcError(pub String);

impl RpcError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type RpcResult<T> = Result<T, RpcError>;

/// Remote chain indexer used by the synchronizer and the send pipeline.
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Height of the current chain tip.
    async fn chain_height(&self, network: BtcNetwork) -> RpcResult<u32>;

    /// One page of confirmed history for `address`, newest first, limited to
    /// blocks at or below `max_height`. `last_seen_txid` is the last txid of
    /// the previous page; an empty page means there is nothing older.
    async fn address_history(
        &self,
        network: BtcNetwork,
        address: &str,
        max_height: u32,
        last_seen_txid: Option<Txid>,
    ) -> RpcResult<Vec<Transaction>>;

    /// Broadcast a serialized transaction, returning its txid.
    async fn post_transaction(&self, network: BtcNetwork, raw_tx: &[u8]) -> RpcResult<String>;

    /// Whether `txid` has been mined.
    async fn transaction_status(&self, network: BtcNetwork, txid: &str) -> RpcResult<bool>;
}
