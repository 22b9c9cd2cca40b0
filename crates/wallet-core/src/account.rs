//! Read-only account views built from the keyring and a ledger.

use std::sync::Arc;

use chain_btc::types::{KeyId, Output};
use serde::Serialize;

use crate::error::WalletError;
use crate::keyring::{AccountId, BitcoinAddress, Keyring};
use crate::ledger::SharedLedger;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressInfo {
    pub address_string: String,
    pub key_change: u32,
    pub key_index: u32,
    pub balance: u64,
    /// `txid:index` of each unspent output.
    pub utxos: Vec<String>,
    #[serde(skip)]
    pub unspent_outputs: Vec<Output>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountInfo {
    pub account: AccountId,
    pub chain_height: Option<u32>,
    pub balance: u64,
    /// Every keyring address of the account, in keyring order.
    pub addresses: Vec<AddressInfo>,
}

impl AccountInfo {
    pub fn unspent_outputs(&self) -> impl Iterator<Item = &Output> {
        self.addresses.iter().flat_map(|a| a.unspent_outputs.iter())
    }
}

pub struct AccountInfoProjector {
    ledger: SharedLedger,
    keyring: Arc<dyn Keyring>,
}

impl AccountInfoProjector {
    pub fn new(ledger: SharedLedger, keyring: Arc<dyn Keyring>) -> Self {
        Self { ledger, keyring }
    }

    async fn account_addresses(&self, account: &AccountId) -> Result<Vec<BitcoinAddress>, WalletError> {
        self.keyring
            .addresses(account)
            .await
            .ok_or_else(|| WalletError::UnknownAccount(account.to_string()))
    }

    /// Balance and unspent outputs for every address of `account`.
    pub async fn account_info(&self, account: &AccountId) -> Result<AccountInfo, WalletError> {
        let addresses = self.account_addresses(account).await?;

        let ledger = self.ledger.read().await;
        if ledger.network() != account.network {
            return Err(WalletError::UnknownAccount(account.to_string()));
        }
        let addresses: Vec<AddressInfo> = addresses
            .into_iter()
            .map(|address| {
                let unspent_outputs = ledger.unspent_outputs(&address.address_string);
                AddressInfo {
                    balance: unspent_outputs.iter().map(|o| o.value).sum(),
                    utxos: unspent_outputs.iter().map(|o| o.outpoint.to_string()).collect(),
                    unspent_outputs,
                    address_string: address.address_string,
                    key_change: address.key_id.change,
                    key_index: address.key_id.index,
                }
            })
            .collect();

        Ok(AccountInfo {
            account: *account,
            chain_height: ledger.chain_height(),
            balance: addresses.iter().map(|a| a.balance).sum(),
            addresses,
        })
    }

    /// First address on the receive (or change) branch with no stored
    /// history. Once every listed address has been used, the next index on
    /// that branch is derived from the keyring.
    pub async fn next_unused_address(
        &self,
        account: &AccountId,
        change: bool,
    ) -> Result<BitcoinAddress, WalletError> {
        let branch = if change {
            KeyId::CHANGE_BRANCH
        } else {
            KeyId::RECEIVE_BRANCH
        };
        let mut addresses: Vec<BitcoinAddress> = self
            .account_addresses(account)
            .await?
            .into_iter()
            .filter(|a| a.key_id.change == branch)
            .collect();
        addresses.sort_by_key(|a| a.key_id.index);

        let next_index = {
            let ledger = self.ledger.read().await;
            if let Some(unused) = addresses
                .iter()
                .find(|a| !ledger.has_transactions(&a.address_string))
            {
                return Ok(unused.clone());
            }
            addresses.last().map_or(0, |a| a.key_id.index + 1)
        };

        self.keyring
            .address(account, KeyId { change: branch, index: next_index })
            .await
            .ok_or_else(|| WalletError::UnknownAccount(account.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TransactionLedger;
    use crate::mocks::{funding_tx, MockKeyring};
    use chain_btc::BtcNetwork;

    fn account() -> AccountId {
        AccountId::new(BtcNetwork::Testnet, 0)
    }

    fn projector(receive: u32, change: u32) -> (AccountInfoProjector, SharedLedger) {
        let keyring = Arc::new(MockKeyring::new().with_account(account(), receive, change));
        let ledger = TransactionLedger::shared(BtcNetwork::Testnet);
        (AccountInfoProjector::new(ledger.clone(), keyring), ledger)
    }

    fn address(key_id: KeyId) -> String {
        MockKeyring::address_string(&account(), key_id)
    }

    async fn fund(ledger: &SharedLedger, tag: u8, key_id: KeyId, value: u64) {
        let address = address(key_id);
        ledger
            .write()
            .await
            .add_transactions(&address, vec![funding_tx([tag; 32], &address, value, 10)]);
    }

    #[tokio::test]
    async fn aggregates_balance_per_address() {
        let (projector, ledger) = projector(2, 1);
        fund(&ledger, 1, KeyId::receive(0), 1_500).await;
        fund(&ledger, 2, KeyId::receive(0), 500).await;
        fund(&ledger, 3, KeyId::change(0), 250).await;
        ledger.write().await.set_chain_height(12);

        let info = projector.account_info(&account()).await.unwrap();
        assert_eq!(info.balance, 2_250);
        assert_eq!(info.chain_height, Some(12));
        assert_eq!(info.addresses.len(), 3);
        assert_eq!(info.addresses[0].balance, 2_000);
        assert_eq!(info.addresses[0].utxos.len(), 2);
        assert_eq!(info.addresses[1].balance, 0);
        assert_eq!(info.addresses[2].key_change, 1);
        assert_eq!(info.addresses[2].balance, 250);
        assert_eq!(info.unspent_outputs().count(), 3);
    }

    #[tokio::test]
    async fn account_info_serializes_without_raw_outputs() {
        let (projector, ledger) = projector(1, 0);
        fund(&ledger, 1, KeyId::receive(0), 1_000).await;
        let info = projector.account_info(&account()).await.unwrap();

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["balance"], 1_000);
        assert_eq!(json["account"]["network"], "testnet");
        assert_eq!(json["addresses"][0]["utxos"][0], format!("{}:0", "01".repeat(32)));
        assert!(json["addresses"][0].get("unspent_outputs").is_none());
    }

    #[tokio::test]
    async fn unknown_account_is_an_error() {
        let (projector, _ledger) = projector(1, 0);
        let other = AccountId::new(BtcNetwork::Testnet, 5);
        assert!(matches!(
            projector.account_info(&other).await,
            Err(WalletError::UnknownAccount(_))
        ));
    }

    #[tokio::test]
    async fn next_unused_skips_addresses_with_history() {
        let (projector, ledger) = projector(3, 1);
        let first = projector.next_unused_address(&account(), false).await.unwrap();
        assert_eq!(first.key_id, KeyId::receive(0));

        fund(&ledger, 1, KeyId::receive(0), 1_000).await;
        let next = projector.next_unused_address(&account(), false).await.unwrap();
        assert_eq!(next.key_id, KeyId::receive(1));
        assert_eq!(next.address_string, address(KeyId::receive(1)));

        let change = projector.next_unused_address(&account(), true).await.unwrap();
        assert_eq!(change.key_id, KeyId::change(0));
    }

    #[tokio::test]
    async fn next_unused_derives_past_used_addresses() {
        let (projector, ledger) = projector(1, 0);
        fund(&ledger, 1, KeyId::receive(0), 1_000).await;
        let next = projector.next_unused_address(&account(), false).await.unwrap();
        assert_eq!(next.key_id, KeyId::receive(1));

        let change = projector.next_unused_address(&account(), true).await.unwrap();
        assert_eq!(change.key_id, KeyId::change(0));
    }
}
