//! Wallet service: one ledger per network, the synchronizers that fill them,
//! and the send and account operations that read them.

use std::collections::BTreeMap;
use std::sync::Arc;

use chain_btc::BtcNetwork;
use tracing::info;

use crate::account::{AccountInfo, AccountInfoProjector};
use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::esplora::EsploraRpc;
use crate::keyring::{AccountId, BitcoinAddress, Keyring};
use crate::ledger::{SharedLedger, TransactionLedger};
use crate::rpc::ChainRpc;
use crate::send_to::SendToOrchestrator;
use crate::synchronizer::{ChainSynchronizer, SynchronizerHandle};

pub struct BitcoinWalletService {
    config: WalletConfig,
    keyring: Arc<dyn Keyring>,
    rpc: Arc<dyn ChainRpc>,
    mainnet_ledger: SharedLedger,
    testnet_ledger: SharedLedger,
    synchronizers: BTreeMap<BtcNetwork, SynchronizerHandle>,
}

impl BitcoinWalletService {
    pub fn new(
        config: WalletConfig,
        keyring: Arc<dyn Keyring>,
        rpc: Arc<dyn ChainRpc>,
    ) -> Result<Self, WalletError> {
        config.validate()?;
        Ok(Self {
            config,
            keyring,
            rpc,
            mainnet_ledger: TransactionLedger::shared(BtcNetwork::Mainnet),
            testnet_ledger: TransactionLedger::shared(BtcNetwork::Testnet),
            synchronizers: BTreeMap::new(),
        })
    }

    /// Service backed by the Esplora servers named in `config`.
    pub fn with_esplora(config: WalletConfig, keyring: Arc<dyn Keyring>) -> Result<Self, WalletError> {
        let rpc = Arc::new(EsploraRpc::new(&config)?);
        Self::new(config, keyring, rpc)
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn ledger(&self, network: BtcNetwork) -> SharedLedger {
        match network {
            BtcNetwork::Mainnet => self.mainnet_ledger.clone(),
            BtcNetwork::Testnet => self.testnet_ledger.clone(),
        }
    }

    /// Watch every keyring address of `account`. The first account on a
    /// network starts that network's synchronizer; must be called inside a
    /// tokio runtime.
    pub async fn start_sync(&mut self, account: &AccountId) -> Result<(), WalletError> {
        let addresses: Vec<String> = self
            .keyring
            .addresses(account)
            .await
            .ok_or_else(|| WalletError::UnknownAccount(account.to_string()))?
            .into_iter()
            .map(|a| a.address_string)
            .collect();

        let network = account.network;
        if let Some(handle) = self.synchronizers.get(&network) {
            if handle.is_running() {
                return handle.add_watch_addresses(addresses);
            }
        }

        info!(%network, %account, addresses = addresses.len(), "starting synchronizer");
        let synchronizer = ChainSynchronizer::new(
            network,
            self.rpc.clone(),
            self.ledger(network),
            self.config.poll_interval(),
        );
        self.synchronizers.insert(network, synchronizer.start(addresses));
        Ok(())
    }

    pub fn is_syncing(&self, network: BtcNetwork) -> bool {
        self.synchronizers
            .get(&network)
            .is_some_and(SynchronizerHandle::is_running)
    }

    /// Stop polling `network`. The ledger keeps what it has.
    pub fn stop_sync(&mut self, network: BtcNetwork) {
        if self.synchronizers.remove(&network).is_some() {
            info!(%network, "synchronizer stopped");
        }
    }

    /// See [`SendToOrchestrator::send_to`].
    pub async fn send_to(
        &self,
        account: AccountId,
        address_to: &str,
        amount: u64,
        fee: u64,
    ) -> Result<String, WalletError> {
        SendToOrchestrator::new(self.ledger(account.network), self.keyring.clone(), self.rpc.clone())
            .send_to(account, address_to, amount, fee)
            .await
    }

    fn projector(&self, network: BtcNetwork) -> AccountInfoProjector {
        AccountInfoProjector::new(self.ledger(network), self.keyring.clone())
    }

    pub async fn account_info(&self, account: &AccountId) -> Result<AccountInfo, WalletError> {
        self.projector(account.network).account_info(account).await
    }

    pub async fn next_unused_address(
        &self,
        account: &AccountId,
        change: bool,
    ) -> Result<BitcoinAddress, WalletError> {
        self.projector(account.network)
            .next_unused_address(account, change)
            .await
    }

    /// Whether `txid` has been mined.
    pub async fn transaction_status(&self, network: BtcNetwork, txid: &str) -> Result<bool, WalletError> {
        Ok(self.rpc.transaction_status(network, txid).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mocks::{funding_tx, MockChainRpc, MockKeyring};
    use chain_btc::types::KeyId;

    fn testnet_account() -> AccountId {
        AccountId::new(BtcNetwork::Testnet, 0)
    }

    fn service(rpc: &Arc<MockChainRpc>) -> BitcoinWalletService {
        let keyring = MockKeyring::new()
            .with_account(testnet_account(), 2, 1)
            .with_account(AccountId::new(BtcNetwork::Testnet, 1), 1, 0);
        BitcoinWalletService::new(WalletConfig::default(), Arc::new(keyring), rpc.clone()).unwrap()
    }

    #[test]
    fn rejects_invalid_config() {
        let config = WalletConfig {
            poll_interval_secs: 0,
            ..WalletConfig::default()
        };
        let result = BitcoinWalletService::new(
            config,
            Arc::new(MockKeyring::new()),
            Arc::new(MockChainRpc::new()),
        );
        assert!(matches!(result, Err(WalletError::InvalidConfig(_))));
    }

    #[test]
    fn ledgers_are_per_network() {
        let service = service(&Arc::new(MockChainRpc::new()));
        assert!(Arc::ptr_eq(
            &service.ledger(BtcNetwork::Testnet),
            &service.ledger(BtcNetwork::Testnet)
        ));
        assert!(!Arc::ptr_eq(
            &service.ledger(BtcNetwork::Testnet),
            &service.ledger(BtcNetwork::Mainnet)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn start_sync_fills_ledger() {
        let rpc = Arc::new(MockChainRpc::new());
        let address = MockKeyring::address_string(&testnet_account(), KeyId::receive(1));
        rpc.add_history(BtcNetwork::Testnet, &address, funding_tx([1; 32], &address, 4_000, 50));
        rpc.push_chain_height(60);

        let mut service = service(&rpc);
        service.start_sync(&testnet_account()).await.unwrap();
        assert!(service.is_syncing(BtcNetwork::Testnet));
        assert!(!service.is_syncing(BtcNetwork::Mainnet));
        tokio::time::sleep(Duration::from_secs(1)).await;

        let info = service.account_info(&testnet_account()).await.unwrap();
        assert_eq!(info.balance, 4_000);
        assert_eq!(info.chain_height, Some(60));

        let next = service.next_unused_address(&testnet_account(), false).await.unwrap();
        assert_eq!(next.key_id, KeyId::receive(0));
    }

    #[tokio::test(start_paused = true)]
    async fn second_account_joins_running_synchronizer() {
        let rpc = Arc::new(MockChainRpc::new());
        let second = AccountId::new(BtcNetwork::Testnet, 1);
        let address = MockKeyring::address_string(&second, KeyId::receive(0));
        rpc.add_history(BtcNetwork::Testnet, &address, funding_tx([2; 32], &address, 900, 50));
        rpc.push_chain_height(60);

        let mut service = service(&rpc);
        service.start_sync(&testnet_account()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        service.start_sync(&second).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(service.account_info(&second).await.unwrap().balance, 900);
        assert_eq!(rpc.chain_height_calls(), 1);

        service.stop_sync(BtcNetwork::Testnet);
        assert!(!service.is_syncing(BtcNetwork::Testnet));
    }

    #[tokio::test]
    async fn unknown_account_cannot_sync() {
        let mut service = service(&Arc::new(MockChainRpc::new()));
        let stranger = AccountId::new(BtcNetwork::Mainnet, 7);
        assert!(matches!(
            service.start_sync(&stranger).await,
            Err(WalletError::UnknownAccount(_))
        ));
    }

    #[tokio::test]
    async fn send_without_height_fails() {
        let service = service(&Arc::new(MockChainRpc::new()));
        let to = MockKeyring::address_string(&testnet_account(), KeyId::receive(1));
        let err = service
            .send_to(testnet_account(), &to, 1_000, 100)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid chain height");
    }

    #[tokio::test]
    async fn transaction_status_passes_through() {
        let rpc = Arc::new(MockChainRpc::new());
        rpc.set_confirmed("ab");
        let service = service(&rpc);
        assert!(service.transaction_status(BtcNetwork::Testnet, "ab").await.unwrap());
        assert!(!service.transaction_status(BtcNetwork::Testnet, "cd").await.unwrap());
    }
}
