//! Transactions as reported by a chain-indexing RPC.

use crate::error::BtcError;

pub type Txid = [u8; 32];

/// Parse a display-order (big-endian) txid hex string.
pub fn parse_txid(txid_hex: &str) -> Result<Txid, BtcError> {
    let bytes = hex::decode(txid_hex).map_err(|e| BtcError::InvalidTxid(format!("{txid_hex}: {e}")))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| BtcError::InvalidTxid(format!("expected 32 bytes, got {}", b.len())))
}

pub fn txid_to_hex(txid: &Txid) -> String {
    hex::encode(txid)
}

/// Position of a key under an account: `change` is the BIP-32 branch
/// (0 receive, 1 change) and `index` the address index on that branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyId {
    pub change: u32,
    pub index: u32,
}

impl KeyId {
    pub const RECEIVE_BRANCH: u32 = 0;
    pub const CHANGE_BRANCH: u32 = 1;

    pub fn receive(index: u32) -> Self {
        Self {
            change: Self::RECEIVE_BRANCH,
            index,
        }
    }

    pub fn change(index: u32) -> Self {
        Self {
            change: Self::CHANGE_BRANCH,
            index,
        }
    }
}

/// A reference to a previous transaction output. Ordered by txid bytes,
/// then output index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Outpoint {
    /// Display-order txid.
    pub txid: Txid,
    pub index: u32,
}

impl Outpoint {
    pub fn new(txid: Txid, index: u32) -> Self {
        Self { txid, index }
    }
}

impl std::fmt::Display for Outpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", txid_to_hex(&self.txid), self.index)
    }
}

/// One output of an observed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    pub outpoint: Outpoint,
    /// Value in satoshis.
    pub value: u64,
    pub scriptpubkey_address: String,
    pub scriptpubkey: Vec<u8>,
}

/// One input of an observed transaction, identified by the output it spends
/// and that output's address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Input {
    pub outpoint: Outpoint,
    pub scriptpubkey_address: String,
}

/// A confirmed transaction touching a watched address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub txid: Txid,
    pub version: u32,
    pub locktime: u32,
    pub vin: Vec<Input>,
    pub vout: Vec<Output>,
    pub block_height: Option<u32>,
}

impl Transaction {
    pub fn txid_hex(&self) -> String {
        txid_to_hex(&self.txid)
    }
}
