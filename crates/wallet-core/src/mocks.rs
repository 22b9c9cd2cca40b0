//! In-memory `ChainRpc` and `Keyring` implementations for deterministic tests.
//!
//! `MockChainRpc` serves scripted chain heights and address histories and
//! records every call. `MockKeyring` derives real secp256k1 keys from the
//! account and key id, so transactions it signs verify on-chain rules.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use chain_btc::address::{decode_address, pubkey_to_p2wpkh_address, script_pubkey_for};
use chain_btc::hash::double_sha256;
use chain_btc::types::{parse_txid, Input, KeyId, Outpoint, Output, Transaction, Txid};
use chain_btc::BtcNetwork;

use crate::keyring::{AccountId, BitcoinAddress, Keyring};
use crate::rpc::{ChainRpc, RpcError, RpcResult};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Script pubkey for `address` when it decodes on either network.
fn script_for_address(address: &str) -> Vec<u8> {
    decode_address(address, true)
        .or_else(|_| decode_address(address, false))
        .map(|decoded| script_pubkey_for(&decoded))
        .unwrap_or_default()
}

/// A confirmed transaction with a single output of `value` paying `address`.
pub fn funding_tx(txid: Txid, address: &str, value: u64, block_height: u32) -> Transaction {
    Transaction {
        txid,
        version: 2,
        locktime: 0,
        vin: Vec::new(),
        vout: vec![Output {
            outpoint: Outpoint::new(txid, 0),
            value,
            scriptpubkey_address: address.to_string(),
            scriptpubkey: script_for_address(address),
        }],
        block_height: Some(block_height),
    }
}

#[derive(Debug, Default)]
struct MockChainState {
    heights: BTreeMap<BtcNetwork, VecDeque<RpcResult<u32>>>,
    current_height: BTreeMap<BtcNetwork, RpcResult<u32>>,
    chain_height_calls: usize,
    histories: BTreeMap<(BtcNetwork, String), Vec<Transaction>>,
    history_calls: Vec<(String, Option<Txid>)>,
    /// Remaining successful history calls before an address starts failing.
    history_budget: BTreeMap<(BtcNetwork, String), usize>,
    posted: Vec<(BtcNetwork, Vec<u8>)>,
    confirmed_posts: usize,
    post_error: Option<String>,
    confirmed_txids: BTreeSet<String>,
}

/// Scripted chain indexer.
///
/// Heights are served from a queue per network; once the queue is empty the
/// last value keeps being returned. Histories are served newest first in
/// pages of `page_size`.
#[derive(Debug)]
pub struct MockChainRpc {
    page_size: usize,
    state: Mutex<MockChainState>,
}

impl Default for MockChainRpc {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChainRpc {
    pub fn new() -> Self {
        Self {
            page_size: 25,
            state: Mutex::new(MockChainState::default()),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Queue a height for the testnet.
    pub fn push_chain_height(&self, height: u32) {
        self.push_chain_height_for(BtcNetwork::Testnet, Ok(height));
    }

    /// Queue a failing height fetch for the testnet.
    pub fn push_chain_height_error(&self, message: &str) {
        self.push_chain_height_for(BtcNetwork::Testnet, Err(RpcError::new(message)));
    }

    pub fn push_chain_height_for(&self, network: BtcNetwork, height: RpcResult<u32>) {
        lock(&self.state)
            .heights
            .entry(network)
            .or_default()
            .push_back(height);
    }

    pub fn chain_height_calls(&self) -> usize {
        lock(&self.state).chain_height_calls
    }

    pub fn add_history(&self, network: BtcNetwork, address: &str, tx: Transaction) {
        lock(&self.state)
            .histories
            .entry((network, address.to_string()))
            .or_default()
            .push(tx);
    }

    /// Let `calls` more history requests for `address` succeed, then fail.
    pub fn fail_history_after(&self, network: BtcNetwork, address: &str, calls: usize) {
        lock(&self.state)
            .history_budget
            .insert((network, address.to_string()), calls);
    }

    /// `(address, cursor)` of every history request, in call order.
    pub fn history_calls(&self) -> Vec<(String, Option<Txid>)> {
        lock(&self.state).history_calls.clone()
    }

    /// Make every following broadcast fail with `message`.
    pub fn fail_post(&self, message: &str) {
        lock(&self.state).post_error = Some(message.to_string());
    }

    /// Raw bytes of every broadcast attempt that reached the mock.
    pub fn posted(&self) -> Vec<Vec<u8>> {
        lock(&self.state)
            .posted
            .iter()
            .map(|(_, raw)| raw.clone())
            .collect()
    }

    pub fn set_confirmed(&self, txid: &str) {
        lock(&self.state).confirmed_txids.insert(txid.to_string());
    }

    /// Mine every broadcast transaction not yet mined at `block_height`: it
    /// is added to the history of each known address it spends from or pays
    /// to. Returns the txids that were mined.
    pub fn confirm_posted(&self, block_height: u32) -> Vec<String> {
        let mut state = lock(&self.state);
        let pending: Vec<(BtcNetwork, Vec<u8>)> = state.posted[state.confirmed_posts..].to_vec();
        state.confirmed_posts = state.posted.len();

        let mut mined = Vec::new();
        for (network, raw) in pending {
            let Some(tx) = state.observed_transaction(network, &raw, block_height) else {
                continue;
            };
            let addresses: BTreeSet<String> = tx
                .vin
                .iter()
                .map(|input| input.scriptpubkey_address.clone())
                .chain(tx.vout.iter().map(|output| output.scriptpubkey_address.clone()))
                .filter(|address| !address.is_empty())
                .collect();
            for address in addresses {
                state
                    .histories
                    .entry((network, address))
                    .or_default()
                    .push(tx.clone());
            }
            let txid = tx.txid_hex();
            state.confirmed_txids.insert(txid.clone());
            mined.push(txid);
        }
        mined
    }
}

impl MockChainState {
    fn known_output(&self, network: BtcNetwork, outpoint: &Outpoint) -> Option<&Output> {
        self.histories
            .iter()
            .filter(|((n, _), _)| *n == network)
            .flat_map(|(_, txs)| txs.iter())
            .flat_map(|tx| tx.vout.iter())
            .find(|output| output.outpoint == *outpoint)
    }

    fn observed_transaction(
        &self,
        network: BtcNetwork,
        raw: &[u8],
        block_height: u32,
    ) -> Option<Transaction> {
        let parsed: bitcoin::Transaction = bitcoin::consensus::deserialize(raw).ok()?;
        let txid = parse_txid(&parsed.compute_txid().to_string()).ok()?;

        let mut vin = Vec::with_capacity(parsed.input.len());
        for input in &parsed.input {
            let spent = Outpoint::new(
                parse_txid(&input.previous_output.txid.to_string()).ok()?,
                input.previous_output.vout,
            );
            let address = self
                .known_output(network, &spent)
                .map(|output| output.scriptpubkey_address.clone())
                .unwrap_or_default();
            vin.push(Input {
                outpoint: spent,
                scriptpubkey_address: address,
            });
        }

        let vout = parsed
            .output
            .iter()
            .enumerate()
            .map(|(index, output)| Output {
                outpoint: Outpoint::new(txid, index as u32),
                value: output.value.to_sat(),
                scriptpubkey_address: bitcoin::Address::from_script(
                    &output.script_pubkey,
                    network.to_bitcoin_network(),
                )
                .map(|address| address.to_string())
                .unwrap_or_default(),
                scriptpubkey: output.script_pubkey.to_bytes(),
            })
            .collect();

        Some(Transaction {
            txid,
            version: parsed.version.0 as u32,
            locktime: parsed.lock_time.to_consensus_u32(),
            vin,
            vout,
            block_height: Some(block_height),
        })
    }
}

#[async_trait]
impl ChainRpc for MockChainRpc {
    async fn chain_height(&self, network: BtcNetwork) -> RpcResult<u32> {
        let mut state = lock(&self.state);
        state.chain_height_calls += 1;
        if let Some(next) = state.heights.get_mut(&network).and_then(VecDeque::pop_front) {
            state.current_height.insert(network, next);
        }
        state
            .current_height
            .get(&network)
            .cloned()
            .unwrap_or_else(|| Err(RpcError::new("chain height unavailable")))
    }

    async fn address_history(
        &self,
        network: BtcNetwork,
        address: &str,
        max_height: u32,
        last_seen_txid: Option<Txid>,
    ) -> RpcResult<Vec<Transaction>> {
        let mut state = lock(&self.state);
        state.history_calls.push((address.to_string(), last_seen_txid));

        let key = (network, address.to_string());
        if let Some(budget) = state.history_budget.get_mut(&key) {
            if *budget == 0 {
                return Err(RpcError::new(format!("history for {address} unavailable")));
            }
            *budget -= 1;
        }

        let mut confirmed: Vec<(usize, &Transaction)> = state
            .histories
            .get(&key)
            .map(|txs| {
                txs.iter()
                    .enumerate()
                    .filter(|(_, tx)| tx.block_height.is_some_and(|h| h <= max_height))
                    .collect()
            })
            .unwrap_or_default();
        confirmed.sort_by_key(|(order, tx)| (Reverse(tx.block_height), Reverse(*order)));

        let start = match last_seen_txid {
            None => 0,
            Some(cursor) => match confirmed.iter().position(|(_, tx)| tx.txid == cursor) {
                Some(position) => position + 1,
                None => confirmed.len(),
            },
        };
        Ok(confirmed
            .into_iter()
            .skip(start)
            .take(self.page_size)
            .map(|(_, tx)| tx.clone())
            .collect())
    }

    async fn post_transaction(&self, network: BtcNetwork, raw_tx: &[u8]) -> RpcResult<String> {
        let mut state = lock(&self.state);
        state.posted.push((network, raw_tx.to_vec()));
        if let Some(message) = &state.post_error {
            return Err(RpcError::new(message.clone()));
        }
        let parsed: bitcoin::Transaction = bitcoin::consensus::deserialize(raw_tx)
            .map_err(|e| RpcError::new(format!("TX decode failed: {e}")))?;
        Ok(parsed.compute_txid().to_string())
    }

    async fn transaction_status(&self, _network: BtcNetwork, txid: &str) -> RpcResult<bool> {
        Ok(lock(&self.state).confirmed_txids.contains(txid))
    }
}

#[derive(Debug, Default)]
struct MockKeyringState {
    /// Receive and change address counts per account.
    accounts: BTreeMap<AccountId, (u32, u32)>,
    missing_pubkeys: BTreeSet<(AccountId, KeyId)>,
    failing_signers: BTreeSet<(AccountId, KeyId)>,
    sign_calls: usize,
}

/// Keyring with keys derived from `double_sha256(network, account, change,
/// index)`. Signatures are DER-encoded ECDSA.
#[derive(Debug, Default)]
pub struct MockKeyring {
    state: Mutex<MockKeyringState>,
}

impl MockKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `account` with `receive` receive addresses and `change`
    /// change addresses.
    pub fn with_account(self, account: AccountId, receive: u32, change: u32) -> Self {
        lock(&self.state).accounts.insert(account, (receive, change));
        self
    }

    /// Make `pubkey` return `None` for this key.
    pub fn remove_pubkey(&self, account: AccountId, key_id: KeyId) {
        lock(&self.state).missing_pubkeys.insert((account, key_id));
    }

    /// Make `sign_digest` return `None` for this key.
    pub fn fail_signing(&self, account: AccountId, key_id: KeyId) {
        lock(&self.state).failing_signers.insert((account, key_id));
    }

    pub fn sign_calls(&self) -> usize {
        lock(&self.state).sign_calls
    }

    pub fn secret_key(account: &AccountId, key_id: KeyId) -> SecretKey {
        let mut seed = Vec::with_capacity(13);
        seed.push(account.network.is_testnet() as u8);
        seed.extend_from_slice(&account.account_index.to_le_bytes());
        seed.extend_from_slice(&key_id.change.to_le_bytes());
        seed.extend_from_slice(&key_id.index.to_le_bytes());
        SecretKey::from_slice(&double_sha256(&seed)).expect("hash is a valid secret key")
    }

    pub fn public_key(account: &AccountId, key_id: KeyId) -> Vec<u8> {
        let secp = Secp256k1::signing_only();
        PublicKey::from_secret_key(&secp, &Self::secret_key(account, key_id))
            .serialize()
            .to_vec()
    }

    pub fn address_string(account: &AccountId, key_id: KeyId) -> String {
        pubkey_to_p2wpkh_address(&Self::public_key(account, key_id), account.network)
            .expect("derived key is a valid compressed key")
    }

    fn is_known(&self, account: &AccountId) -> bool {
        lock(&self.state).accounts.contains_key(account)
    }
}

#[async_trait]
impl Keyring for MockKeyring {
    async fn addresses(&self, account: &AccountId) -> Option<Vec<BitcoinAddress>> {
        let (receive, change) = *lock(&self.state).accounts.get(account)?;
        let keys = (0..receive)
            .map(KeyId::receive)
            .chain((0..change).map(KeyId::change));
        Some(
            keys.map(|key_id| BitcoinAddress {
                address_string: Self::address_string(account, key_id),
                key_id,
            })
            .collect(),
        )
    }

    async fn address(&self, account: &AccountId, key_id: KeyId) -> Option<BitcoinAddress> {
        self.is_known(account).then(|| BitcoinAddress {
            address_string: Self::address_string(account, key_id),
            key_id,
        })
    }

    async fn pubkey(&self, account: &AccountId, key_id: KeyId) -> Option<Vec<u8>> {
        if !self.is_known(account) || lock(&self.state).missing_pubkeys.contains(&(*account, key_id)) {
            return None;
        }
        Some(Self::public_key(account, key_id))
    }

    async fn sign_digest(
        &self,
        account: &AccountId,
        key_id: KeyId,
        digest: &[u8; 32],
    ) -> Option<Vec<u8>> {
        {
            let mut state = lock(&self.state);
            state.sign_calls += 1;
            if !state.accounts.contains_key(account) || state.failing_signers.contains(&(*account, key_id)) {
                return None;
            }
        }
        let secp = Secp256k1::signing_only();
        let signature = secp.sign_ecdsa(
            &Message::from_digest(*digest),
            &Self::secret_key(account, key_id),
        );
        Some(signature.serialize_der().to_vec())
    }
}
