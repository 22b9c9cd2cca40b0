//! Send workflow: from a ledger snapshot to a broadcast P2WPKH transaction.
//!
//! A [`SendToContext`] moves through [`SendToState`] one stage at a time.
//! Each stage works on copies and commits to the context only when it
//! succeeds, so a failed stage leaves the context at the previous state.

use std::sync::Arc;

use chain_btc::address::{decode_address, p2wpkh_script_pubkey, AddressType};
use chain_btc::transaction::{BtcTransaction, TxInput, TxOutput, TxOutputKind, SIGHASH_ALL};
use chain_btc::types::{txid_to_hex, KeyId, Output};
use chain_btc::utxo::select_utxos;
use tracing::{debug, info, warn};

use crate::error::WalletError;
use crate::keyring::{AccountId, Keyring};
use crate::ledger::SharedLedger;
use crate::rpc::ChainRpc;

/// Stages of one send, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SendToState {
    Created,
    LocktimeAssigned,
    UtxoListed,
    InputsPicked,
    OutputsPrepared,
    Signed,
    Serialized,
    Posted,
}

/// State of one send operation. Owned by that operation alone.
#[derive(Debug, Clone)]
pub struct SendToContext {
    pub account: AccountId,
    pub address_to: String,
    pub amount: u64,
    pub fee: u64,
    state: SendToState,
    locktime: Option<u32>,
    utxos: Vec<Output>,
    transaction: BtcTransaction,
    serialized: Vec<u8>,
    txid: Option<String>,
}

impl SendToContext {
    pub fn new(account: AccountId, address_to: impl Into<String>, amount: u64, fee: u64) -> Self {
        Self {
            account,
            address_to: address_to.into(),
            amount,
            fee,
            state: SendToState::Created,
            locktime: None,
            utxos: Vec::new(),
            transaction: BtcTransaction::default(),
            serialized: Vec::new(),
            txid: None,
        }
    }

    /// Use `locktime` instead of the ledger's chain height.
    pub fn with_locktime(mut self, locktime: u32) -> Self {
        self.locktime = Some(locktime);
        self
    }

    pub fn state(&self) -> SendToState {
        self.state
    }

    /// Spendable outputs listed from the ledger.
    pub fn utxos(&self) -> &[Output] {
        &self.utxos
    }

    pub fn transaction(&self) -> &BtcTransaction {
        &self.transaction
    }

    pub fn serialized(&self) -> &[u8] {
        &self.serialized
    }

    /// Txid returned by the broadcast.
    pub fn txid(&self) -> Option<&str> {
        self.txid.as_deref()
    }

    fn target(&self) -> Option<u64> {
        self.amount.checked_add(self.fee)
    }
}

/// Drives [`SendToContext`]s against one network's ledger.
pub struct SendToOrchestrator {
    ledger: SharedLedger,
    keyring: Arc<dyn Keyring>,
    rpc: Arc<dyn ChainRpc>,
}

impl SendToOrchestrator {
    pub fn new(ledger: SharedLedger, keyring: Arc<dyn Keyring>, rpc: Arc<dyn ChainRpc>) -> Self {
        Self {
            ledger,
            keyring,
            rpc,
        }
    }

    /// Pay `amount` plus `fee` satoshis from `account` to `address_to` and
    /// broadcast. Returns the txid reported by the RPC.
    pub async fn send_to(
        &self,
        account: AccountId,
        address_to: &str,
        amount: u64,
        fee: u64,
    ) -> Result<String, WalletError> {
        let mut ctx = SendToContext::new(account, address_to, amount, fee);
        self.run(&mut ctx).await
    }

    /// Advance `ctx` until it is posted or a stage fails.
    pub async fn run(&self, ctx: &mut SendToContext) -> Result<String, WalletError> {
        while ctx.state != SendToState::Posted {
            if let Err(e) = self.advance(ctx).await {
                warn!(account = %ctx.account, state = ?ctx.state, error = %e, "send failed");
                return Err(e);
            }
        }
        ctx.txid
            .clone()
            .ok_or_else(|| WalletError::Internal("posted without txid".into()))
    }

    /// Run the next stage of `ctx` and return the state it reached. A posted
    /// context is left as is.
    pub async fn advance(&self, ctx: &mut SendToContext) -> Result<SendToState, WalletError> {
        match ctx.state {
            SendToState::Created => self.assign_locktime(ctx).await?,
            SendToState::LocktimeAssigned => self.list_utxos(ctx).await?,
            SendToState::UtxoListed => self.pick_inputs(ctx).await?,
            SendToState::InputsPicked => self.prepare_outputs(ctx).await?,
            SendToState::OutputsPrepared => self.fill_signatures(ctx).await?,
            SendToState::Signed => self.serialize(ctx)?,
            SendToState::Serialized => self.post(ctx).await?,
            SendToState::Posted => return Ok(ctx.state),
        }
        debug!(account = %ctx.account, state = ?ctx.state, "send stage done");
        Ok(ctx.state)
    }

    async fn assign_locktime(&self, ctx: &mut SendToContext) -> Result<(), WalletError> {
        let locktime = match ctx.locktime {
            Some(locktime) => locktime,
            None => {
                let ledger = self.ledger.read().await;
                if ledger.network() != ctx.account.network {
                    return Err(WalletError::UnknownAccount(ctx.account.to_string()));
                }
                ledger.chain_height().ok_or(WalletError::InvalidChainHeight)?
            }
        };
        ctx.locktime = Some(locktime);
        ctx.transaction.locktime = locktime;
        ctx.state = SendToState::LocktimeAssigned;
        Ok(())
    }

    async fn list_utxos(&self, ctx: &mut SendToContext) -> Result<(), WalletError> {
        let utxos = {
            let ledger = self.ledger.read().await;
            if ledger.network() != ctx.account.network {
                return Err(WalletError::UnknownAccount(ctx.account.to_string()));
            }
            ledger.all_unspent_outputs()
        };
        if utxos.is_empty() {
            return Err(WalletError::NoOutputsToSpend);
        }
        ctx.utxos = utxos;
        ctx.state = SendToState::UtxoListed;
        Ok(())
    }

    async fn pick_inputs(&self, ctx: &mut SendToContext) -> Result<(), WalletError> {
        let target = ctx.target().ok_or(WalletError::PickInputsFailed)?;
        let selection = select_utxos(&ctx.utxos, target).map_err(|e| {
            debug!(account = %ctx.account, target, error = %e, "input selection failed");
            WalletError::PickInputsFailed
        })?;
        let addresses = self
            .keyring
            .addresses(&ctx.account)
            .await
            .ok_or(WalletError::PickInputsFailed)?;

        let mut inputs = Vec::with_capacity(selection.selected.len());
        for utxo in selection.selected {
            let Some(owner) = addresses
                .iter()
                .find(|a| a.address_string == utxo.scriptpubkey_address)
            else {
                debug!(account = %ctx.account, outpoint = %utxo.outpoint, "utxo not owned by account");
                return Err(WalletError::PickInputsFailed);
            };
            let pubkey = self
                .keyring
                .pubkey(&ctx.account, owner.key_id)
                .await
                .ok_or(WalletError::PickInputsFailed)?;
            inputs.push(TxInput::new(utxo, owner.key_id, pubkey));
        }

        ctx.transaction.inputs = inputs;
        ctx.state = SendToState::InputsPicked;
        Ok(())
    }

    async fn prepare_outputs(&self, ctx: &mut SendToContext) -> Result<(), WalletError> {
        let target = ctx.target().ok_or(WalletError::PrepareOutputsFailed)?;
        let testnet = ctx.account.is_testnet();

        let mut outputs = vec![p2wpkh_output(
            TxOutputKind::Target,
            &ctx.address_to,
            ctx.amount,
            testnet,
        )?];

        let change = ctx
            .transaction
            .total_input_value()
            .checked_sub(target)
            .ok_or(WalletError::PrepareOutputsFailed)?;
        if change > 0 {
            let change_address = self
                .keyring
                .address(&ctx.account, KeyId::change(0))
                .await
                .ok_or(WalletError::PrepareOutputsFailed)?;
            outputs.push(p2wpkh_output(
                TxOutputKind::Change,
                &change_address.address_string,
                change,
                testnet,
            )?);
        }

        ctx.transaction.outputs = outputs;
        ctx.state = SendToState::OutputsPrepared;
        Ok(())
    }

    async fn fill_signatures(&self, ctx: &mut SendToContext) -> Result<(), WalletError> {
        let mut signatures = Vec::with_capacity(ctx.transaction.inputs.len());
        for (index, input) in ctx.transaction.inputs.iter().enumerate() {
            let digest = ctx
                .transaction
                .sighash(index)
                .map_err(|_| WalletError::FillSignaturesFailed)?;
            let mut signature = self
                .keyring
                .sign_digest(&ctx.account, input.key_id, &digest)
                .await
                .ok_or(WalletError::FillSignaturesFailed)?;
            signature.push(SIGHASH_ALL);
            signatures.push(signature);
        }

        for (input, signature) in ctx.transaction.inputs.iter_mut().zip(signatures) {
            input.signature = signature;
        }
        ctx.state = SendToState::Signed;
        Ok(())
    }

    fn serialize(&self, ctx: &mut SendToContext) -> Result<(), WalletError> {
        ctx.serialized = ctx
            .transaction
            .serialize()
            .map_err(|_| WalletError::SerializeFailed)?;
        ctx.state = SendToState::Serialized;
        Ok(())
    }

    async fn post(&self, ctx: &mut SendToContext) -> Result<(), WalletError> {
        let txid = self
            .rpc
            .post_transaction(ctx.account.network, &ctx.serialized)
            .await?;

        let expected = txid_to_hex(&ctx.transaction.txid());
        if txid != expected {
            warn!(%txid, %expected, "broadcast returned unexpected txid");
        }
        info!(
            account = %ctx.account,
            %txid,
            amount = ctx.amount,
            fee = ctx.fee,
            inputs = ctx.transaction.inputs.len(),
            outputs = ctx.transaction.outputs.len(),
            "transaction broadcast"
        );
        ctx.txid = Some(txid);
        ctx.state = SendToState::Posted;
        Ok(())
    }
}

/// Build an output paying a P2WPKH `address`; any other address kind fails.
fn p2wpkh_output(
    kind: TxOutputKind,
    address: &str,
    amount: u64,
    testnet: bool,
) -> Result<TxOutput, WalletError> {
    let decoded = decode_address(address, testnet).map_err(|e| {
        debug!(%address, error = %e, "cannot decode output address");
        WalletError::PrepareOutputsFailed
    })?;
    if decoded.address_type != AddressType::WitnessV0PubkeyHash {
        debug!(%address, address_type = ?decoded.address_type, "unsupported output address type");
        return Err(WalletError::PrepareOutputsFailed);
    }
    let hash: [u8; 20] = decoded
        .pubkey_hash
        .as_slice()
        .try_into()
        .map_err(|_| WalletError::PrepareOutputsFailed)?;
    Ok(TxOutput {
        kind,
        address: address.to_string(),
        script_pubkey: p2wpkh_script_pubkey(&hash),
        amount,
    })
}
