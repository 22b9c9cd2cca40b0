//! Keeps a ledger current for a set of watched addresses.
//!
//! The synchronizer polls the chain height and, whenever it changes,
//! re-walks the full confirmed history of every watched address. Inserts
//! into the ledger are idempotent, so re-walking is always safe. RPC
//! failures are logged and dropped; the next poll retries.
//!
//! A running synchronizer lives in its own task and is the only writer of
//! its ledger. [`SynchronizerHandle`] controls it; dropping the handle stops
//! polling.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chain_btc::types::{txid_to_hex, Transaction, Txid};
use chain_btc::BtcNetwork;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::WalletError;
use crate::ledger::SharedLedger;
use crate::rpc::ChainRpc;

/// Paging cursors for one watched address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchedAddressData {
    /// Most recent txid seen on the first history page.
    pub newest_txid: Option<Txid>,
    /// Last txid before the history ran out.
    pub oldest_txid: Option<Txid>,
}

pub struct ChainSynchronizer {
    network: BtcNetwork,
    rpc: Arc<dyn ChainRpc>,
    ledger: SharedLedger,
    watched: BTreeMap<String, WatchedAddressData>,
    poll_interval: Duration,
}

impl ChainSynchronizer {
    pub fn new(
        network: BtcNetwork,
        rpc: Arc<dyn ChainRpc>,
        ledger: SharedLedger,
        poll_interval: Duration,
    ) -> Self {
        Self {
            network,
            rpc,
            ledger,
            watched: BTreeMap::new(),
            poll_interval,
        }
    }

    pub fn network(&self) -> BtcNetwork {
        self.network
    }

    pub fn watched_addresses(&self) -> impl Iterator<Item = &str> {
        self.watched.keys().map(String::as_str)
    }

    pub fn watched_address_data(&self, address: &str) -> Option<&WatchedAddressData> {
        self.watched.get(address)
    }

    /// Watch `addresses`. New addresses are synced right away when the chain
    /// height is already known; otherwise the next height change picks them up.
    pub async fn add_watch_addresses(&mut self, addresses: Vec<String>) {
        let chain_height = self.ledger.read().await.chain_height();
        for address in addresses {
            if self.watched.contains_key(&address) {
                continue;
            }
            debug!(network = %self.network, %address, "watching address");
            self.watched.insert(address.clone(), WatchedAddressData::default());
            if let Some(height) = chain_height {
                self.sync_address(&address, height).await;
            }
        }
    }

    /// Fetch the chain height once. Returns `true` when the height changed
    /// and every watched address was re-synced.
    pub async fn poll_chain_height(&mut self) -> bool {
        match self.rpc.chain_height(self.network).await {
            Ok(height) => self.on_chain_height(height).await,
            Err(e) => {
                warn!(network = %self.network, error = %e, "chain height fetch failed");
                false
            }
        }
    }

    async fn on_chain_height(&mut self, height: u32) -> bool {
        {
            let mut ledger = self.ledger.write().await;
            if ledger.chain_height() == Some(height) {
                return false;
            }
            ledger.set_chain_height(height);
        }

        info!(network = %self.network, height, addresses = self.watched.len(), "chain height changed, resyncing");
        let addresses: Vec<String> = self.watched.keys().cloned().collect();
        for address in addresses {
            self.sync_address(&address, height).await;
        }
        true
    }

    /// Walk the whole confirmed history of `address` up to `max_height`.
    ///
    /// Pages are collected first and stored together, so a failed walk
    /// leaves the ledger untouched instead of holding spends without the
    /// outputs they consume.
    pub async fn sync_address(&mut self, address: &str, max_height: u32) -> bool {
        let mut cursor: Option<Txid> = None;
        let mut newest_txid = None;
        let mut oldest_txid = None;
        let mut fetched: Vec<Transaction> = Vec::new();

        loop {
            let page = match self
                .rpc
                .address_history(self.network, address, max_height, cursor)
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!(network = %self.network, %address, error = %e, "address history fetch failed");
                    return false;
                }
            };

            let Some(last) = page.last() else {
                if cursor.is_some() {
                    oldest_txid = cursor;
                }
                break;
            };
            if cursor == Some(last.txid) {
                warn!(network = %self.network, %address, txid = %txid_to_hex(&last.txid), "history cursor did not advance");
                break;
            }
            if cursor.is_none() {
                newest_txid = Some(page[0].txid);
            }
            cursor = Some(last.txid);
            fetched.extend(page);
        }

        let count = fetched.len();
        let inserted = self.ledger.write().await.add_transactions(address, fetched);
        if let Some(data) = self.watched.get_mut(address) {
            if newest_txid.is_some() {
                data.newest_txid = newest_txid;
            }
            if oldest_txid.is_some() {
                data.oldest_txid = oldest_txid;
            }
        }
        debug!(network = %self.network, %address, count, inserted, "address history synced");
        true
    }

    /// Move the synchronizer into a background task: watch `addresses`,
    /// fetch the chain height now and then every poll interval.
    pub fn start(mut self, addresses: Vec<String>) -> SynchronizerHandle {
        let network = self.network;
        let (commands, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            self.run(addresses, receiver).await;
        });
        SynchronizerHandle {
            network,
            commands,
            task,
        }
    }

    async fn run(&mut self, addresses: Vec<String>, mut commands: mpsc::UnboundedReceiver<SyncCommand>) {
        self.add_watch_addresses(addresses).await;

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_chain_height().await;
                }
                command = commands.recv() => match command {
                    Some(SyncCommand::AddWatchAddresses(addresses)) => {
                        self.add_watch_addresses(addresses).await;
                    }
                    None => break,
                },
            }
        }
        debug!(network = %self.network, "synchronizer stopped");
    }
}

enum SyncCommand {
    AddWatchAddresses(Vec<String>),
}

/// Control handle for a running [`ChainSynchronizer`]. Dropping it aborts
/// the polling task.
pub struct SynchronizerHandle {
    network: BtcNetwork,
    commands: mpsc::UnboundedSender<SyncCommand>,
    task: JoinHandle<()>,
}

impl SynchronizerHandle {
    pub fn network(&self) -> BtcNetwork {
        self.network
    }

    pub fn add_watch_addresses(&self, addresses: Vec<String>) -> Result<(), WalletError> {
        self.commands
            .send(SyncCommand::AddWatchAddresses(addresses))
            .map_err(|_| WalletError::SyncStopped)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SynchronizerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TransactionLedger;
    use crate::mocks::{funding_tx, MockChainRpc};

    const ADDR_A: &str = "tb1qsyncaddressa";
    const ADDR_B: &str = "tb1qsyncaddressb";

    fn synchronizer(rpc: &Arc<MockChainRpc>) -> (ChainSynchronizer, SharedLedger) {
        let ledger = TransactionLedger::shared(BtcNetwork::Testnet);
        let sync = ChainSynchronizer::new(
            BtcNetwork::Testnet,
            rpc.clone(),
            ledger.clone(),
            Duration::from_secs(10),
        );
        (sync, ledger)
    }

    #[tokio::test]
    async fn height_change_resyncs_every_address() {
        let rpc = Arc::new(MockChainRpc::new());
        rpc.add_history(BtcNetwork::Testnet, ADDR_A, funding_tx([1; 32], ADDR_A, 5_000, 90));
        rpc.add_history(BtcNetwork::Testnet, ADDR_B, funding_tx([2; 32], ADDR_B, 7_000, 95));
        rpc.push_chain_height(100);
        let (mut sync, ledger) = synchronizer(&rpc);

        sync.add_watch_addresses(vec![ADDR_A.into(), ADDR_B.into()]).await;
        assert_eq!(rpc.history_calls().len(), 0, "height unknown, nothing to sync yet");

        assert!(sync.poll_chain_height().await);
        assert_eq!(ledger.read().await.chain_height(), Some(100));
        assert_eq!(ledger.read().await.balance(ADDR_A), 5_000);
        assert_eq!(ledger.read().await.balance(ADDR_B), 7_000);
        let first_round = rpc.history_calls().len();
        // Each address: one non-empty page, then an empty page.
        assert_eq!(first_round, 4);

        rpc.push_chain_height(101);
        assert!(sync.poll_chain_height().await);
        assert_eq!(rpc.history_calls().len(), first_round * 2);
    }

    #[tokio::test]
    async fn unchanged_height_does_nothing() {
        let rpc = Arc::new(MockChainRpc::new());
        rpc.push_chain_height(100);
        let (mut sync, _ledger) = synchronizer(&rpc);
        sync.add_watch_addresses(vec![ADDR_A.into()]).await;

        assert!(sync.poll_chain_height().await);
        let calls = rpc.history_calls().len();
        assert!(!sync.poll_chain_height().await);
        assert_eq!(rpc.history_calls().len(), calls);
    }

    #[tokio::test]
    async fn height_failure_is_dropped() {
        let rpc = Arc::new(MockChainRpc::new());
        rpc.push_chain_height_error("timeout");
        rpc.push_chain_height(100);
        let (mut sync, ledger) = synchronizer(&rpc);

        assert!(!sync.poll_chain_height().await);
        assert_eq!(ledger.read().await.chain_height(), None);
        assert!(sync.poll_chain_height().await);
        assert_eq!(ledger.read().await.chain_height(), Some(100));
    }

    #[tokio::test]
    async fn added_address_syncs_immediately_when_height_known() {
        let rpc = Arc::new(MockChainRpc::new());
        rpc.add_history(BtcNetwork::Testnet, ADDR_B, funding_tx([2; 32], ADDR_B, 7_000, 95));
        rpc.push_chain_height(100);
        let (mut sync, ledger) = synchronizer(&rpc);
        sync.poll_chain_height().await;

        sync.add_watch_addresses(vec![ADDR_B.into()]).await;
        assert_eq!(ledger.read().await.balance(ADDR_B), 7_000);
        assert_eq!(sync.watched_addresses().collect::<Vec<_>>(), vec![ADDR_B]);
    }

    #[tokio::test]
    async fn paging_follows_cursor_and_records_bounds() {
        let rpc = Arc::new(MockChainRpc::new().with_page_size(2));
        for (i, height) in [(1u8, 10), (2, 20), (3, 30), (4, 40), (5, 50)] {
            rpc.add_history(BtcNetwork::Testnet, ADDR_A, funding_tx([i; 32], ADDR_A, 1_000, height));
        }
        let (mut sync, ledger) = synchronizer(&rpc);
        sync.add_watch_addresses(vec![ADDR_A.into()]).await;

        assert!(sync.sync_address(ADDR_A, 100).await);
        let calls = rpc.history_calls();
        let cursors: Vec<Option<Txid>> = calls.iter().map(|(_, cursor)| *cursor).collect();
        // Newest first: [5, 4], [3, 2], [1], [].
        assert_eq!(cursors, vec![None, Some([4; 32]), Some([2; 32]), Some([1; 32])]);
        assert_eq!(ledger.read().await.balance(ADDR_A), 5_000);

        let data = sync.watched_address_data(ADDR_A).unwrap();
        assert_eq!(data.newest_txid, Some([5; 32]));
        assert_eq!(data.oldest_txid, Some([1; 32]));
    }

    #[tokio::test]
    async fn history_respects_max_height() {
        let rpc = Arc::new(MockChainRpc::new());
        rpc.add_history(BtcNetwork::Testnet, ADDR_A, funding_tx([1; 32], ADDR_A, 1_000, 50));
        rpc.add_history(BtcNetwork::Testnet, ADDR_A, funding_tx([2; 32], ADDR_A, 2_000, 150));
        let (mut sync, ledger) = synchronizer(&rpc);
        sync.add_watch_addresses(vec![ADDR_A.into()]).await;

        sync.sync_address(ADDR_A, 100).await;
        assert_eq!(ledger.read().await.balance(ADDR_A), 1_000);
    }

    #[tokio::test]
    async fn failed_walk_stores_nothing() {
        let rpc = Arc::new(MockChainRpc::new().with_page_size(1));
        rpc.add_history(BtcNetwork::Testnet, ADDR_A, funding_tx([1; 32], ADDR_A, 1_000, 10));
        rpc.add_history(BtcNetwork::Testnet, ADDR_A, funding_tx([2; 32], ADDR_A, 2_000, 20));
        rpc.fail_history_after(BtcNetwork::Testnet, ADDR_A, 1);
        let (mut sync, ledger) = synchronizer(&rpc);
        sync.add_watch_addresses(vec![ADDR_A.into()]).await;

        assert!(!sync.sync_address(ADDR_A, 100).await);
        assert!(!ledger.read().await.has_transactions(ADDR_A));
        assert_eq!(sync.watched_address_data(ADDR_A), Some(&WatchedAddressData::default()));
    }

    #[tokio::test(start_paused = true)]
    async fn background_task_polls_on_interval() {
        let rpc = Arc::new(MockChainRpc::new());
        rpc.add_history(BtcNetwork::Testnet, ADDR_A, funding_tx([1; 32], ADDR_A, 5_000, 90));
        rpc.push_chain_height(100);
        rpc.push_chain_height(100);
        rpc.push_chain_height(101);
        let (sync, ledger) = synchronizer(&rpc);

        let handle = sync.start(vec![ADDR_A.into()]);
        // Ticks at 0s, 10s and 20s.
        tokio::time::sleep(Duration::from_secs(25)).await;

        assert_eq!(rpc.chain_height_calls(), 3);
        assert_eq!(ledger.read().await.chain_height(), Some(101));
        assert_eq!(ledger.read().await.balance(ADDR_A), 5_000);
        // Two resyncs (100 and 101) of two pages each.
        assert_eq!(rpc.history_calls().len(), 4);
        assert!(handle.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn handle_adds_addresses_and_drop_stops_polling() {
        let rpc = Arc::new(MockChainRpc::new());
        rpc.add_history(BtcNetwork::Testnet, ADDR_B, funding_tx([2; 32], ADDR_B, 7_000, 95));
        rpc.push_chain_height(100);
        let (sync, ledger) = synchronizer(&rpc);

        let handle = sync.start(vec![ADDR_A.into()]);
        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.add_watch_addresses(vec![ADDR_B.into()]).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ledger.read().await.balance(ADDR_B), 7_000);

        drop(handle);
        let polls = rpc.chain_height_calls();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(rpc.chain_height_calls(), polls);
    }
}
