//! In-memory UTXO index for one network.
//!
//! Transactions are stored per watched address and deduplicated by txid.
//! Unspent outputs are derived on demand: every output paying an address
//! minus every output that an input of the same address consumes.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use chain_btc::types::{Outpoint, Output, Transaction, Txid};
use chain_btc::BtcNetwork;
use tokio::sync::RwLock;

/// Ledger shared between its single writer (the synchronizer) and readers.
pub type SharedLedger = Arc<RwLock<TransactionLedger>>;

#[derive(Debug)]
pub struct TransactionLedger {
    network: BtcNetwork,
    chain_height: Option<u32>,
    transactions: BTreeMap<String, BTreeMap<Txid, Transaction>>,
}

impl TransactionLedger {
    pub fn new(network: BtcNetwork) -> Self {
        Self {
            network,
            chain_height: None,
            transactions: BTreeMap::new(),
        }
    }

    pub fn shared(network: BtcNetwork) -> SharedLedger {
        Arc::new(RwLock::new(Self::new(network)))
    }

    pub fn network(&self) -> BtcNetwork {
        self.network
    }

    /// Overwrites the stored height. Callers decide whether it may go down.
    pub fn set_chain_height(&mut self, height: u32) {
        self.chain_height = Some(height);
    }

    pub fn chain_height(&self) -> Option<u32> {
        self.chain_height
    }

    /// Store `txs` under `address`. A txid that is already stored keeps its
    /// first copy. Returns whether anything new was stored.
    pub fn add_transactions(
        &mut self,
        address: &str,
        txs: impl IntoIterator<Item = Transaction>,
    ) -> bool {
        let stored = self.transactions.entry(address.to_string()).or_default();
        let mut inserted = false;
        for tx in txs {
            if let Entry::Vacant(slot) = stored.entry(tx.txid) {
                slot.insert(tx);
                inserted = true;
            }
        }
        inserted
    }

    pub fn has_transactions(&self, address: &str) -> bool {
        self.transactions
            .get(address)
            .is_some_and(|txs| !txs.is_empty())
    }

    pub fn transaction_count(&self, address: &str) -> usize {
        self.transactions.get(address).map_or(0, BTreeMap::len)
    }

    /// Addresses with stored history, in lexicographic order.
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.transactions.keys().map(String::as_str)
    }

    /// Unspent outputs of `address`, ordered by outpoint.
    ///
    /// # Panics
    ///
    /// If a stored input spends an output of `address` that no stored
    /// transaction created. That means the indexer returned inconsistent
    /// history.
    pub fn unspent_outputs(&self, address: &str) -> Vec<Output> {
        let Some(txs) = self.transactions.get(address) else {
            return Vec::new();
        };

        let mut outputs: BTreeMap<Outpoint, &Output> = txs
            .values()
            .flat_map(|tx| tx.vout.iter())
            .filter(|output| output.scriptpubkey_address == address)
            .map(|output| (output.outpoint, output))
            .collect();

        for input in txs.values().flat_map(|tx| tx.vin.iter()) {
            if input.scriptpubkey_address != address {
                continue;
            }
            assert!(
                outputs.remove(&input.outpoint).is_some(),
                "{address} spends unknown output {}",
                input.outpoint
            );
        }

        outputs.into_values().cloned().collect()
    }

    /// Unspent outputs of every stored address, grouped by address in
    /// lexicographic order.
    pub fn all_unspent_outputs(&self) -> Vec<Output> {
        self.transactions
            .keys()
            .flat_map(|address| self.unspent_outputs(address))
            .collect()
    }

    pub fn balance(&self, address: &str) -> u64 {
        self.unspent_outputs(address).iter().map(|o| o.value).sum()
    }
}
