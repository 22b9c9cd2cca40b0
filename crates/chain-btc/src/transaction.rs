//! Spending transactions: BIP-143 signature hashes and BIP-144 serialization.

use crate::address::p2wpkh_script_code;
use crate::error::BtcError;
use crate::hash::{double_sha256, hash160};
use crate::serializer::SerializerStream;
use crate::types::{KeyId, Output, Txid};

pub const TX_VERSION: u32 = 2;

/// Sighash type appended to every signature and committed to in the digest.
pub const SIGHASH_ALL: u8 = 0x01;

/// Signals replaceability and keeps `locktime` enforced.
pub const DEFAULT_SEQUENCE: u32 = 0xffff_fffd;

const SEGWIT_MARKER: u8 = 0x00;
const SEGWIT_FLAG: u8 = 0x01;

/// An input spending one of our P2WPKH outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    pub utxo: Output,
    /// Key that owns `utxo.scriptpubkey_address`.
    pub key_id: KeyId,
    pub n_sequence: u32,
    /// Compressed public key for `key_id`.
    pub pubkey: Vec<u8>,
    /// Signature with the sighash byte appended; empty until signed.
    pub signature: Vec<u8>,
}

impl TxInput {
    pub fn new(utxo: Output, key_id: KeyId, pubkey: Vec<u8>) -> Self {
        Self {
            utxo,
            key_id,
            n_sequence: DEFAULT_SEQUENCE,
            pubkey,
            signature: Vec::new(),
        }
    }

    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    fn pubkey_hash(&self) -> Result<[u8; 20], BtcError> {
        if self.pubkey.len() != 33 {
            return Err(BtcError::InvalidPublicKey(format!(
                "expected 33-byte compressed key, got {} bytes",
                self.pubkey.len()
            )));
        }
        Ok(hash160(&self.pubkey))
    }

    fn push_outpoint(&self, stream: &mut SerializerStream) {
        stream.push_vector_as_le(&self.utxo.outpoint.txid);
        stream.push_u32(self.utxo.outpoint.index);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutputKind {
    Target,
    Change,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub kind: TxOutputKind,
    pub address: String,
    pub script_pubkey: Vec<u8>,
    pub amount: u64,
}

impl TxOutput {
    fn push(&self, stream: &mut SerializerStream) {
        stream.push_u64(self.amount);
        stream.push_size_and_bytes(&self.script_pubkey);
    }
}

/// A transaction under construction. Inputs and outputs keep the order in
/// which they were added; nothing here re-sorts them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BtcTransaction {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub locktime: u32,
}

impl BtcTransaction {
    pub fn total_input_value(&self) -> u64 {
        self.inputs.iter().map(|i| i.utxo.value).sum()
    }

    pub fn total_output_value(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }

    pub fn is_signed(&self) -> bool {
        !self.inputs.is_empty() && self.inputs.iter().all(TxInput::is_signed)
    }

    fn hash_prevouts(&self) -> [u8; 32] {
        let mut stream = SerializerStream::new();
        for input in &self.inputs {
            input.push_outpoint(&mut stream);
        }
        double_sha256(stream.as_bytes())
    }

    fn hash_sequence(&self) -> [u8; 32] {
        let mut stream = SerializerStream::new();
        for input in &self.inputs {
            stream.push_u32(input.n_sequence);
        }
        double_sha256(stream.as_bytes())
    }

    fn hash_outputs(&self) -> [u8; 32] {
        let mut stream = SerializerStream::new();
        for output in &self.outputs {
            output.push(&mut stream);
        }
        double_sha256(stream.as_bytes())
    }

    /// BIP-143 signature hash (SIGHASH_ALL) for the input at `input_index`.
    pub fn sighash(&self, input_index: usize) -> Result<[u8; 32], BtcError> {
        let input = self.inputs.get(input_index).ok_or_else(|| {
            BtcError::TransactionBuildError(format!("no input at index {input_index}"))
        })?;
        let pubkey_hash = input.pubkey_hash()?;

        let mut stream = SerializerStream::new();
        stream.push_u32(TX_VERSION);
        stream.push_bytes(&self.hash_prevouts());
        stream.push_bytes(&self.hash_sequence());
        input.push_outpoint(&mut stream);
        stream.push_bytes(&p2wpkh_script_code(&pubkey_hash));
        stream.push_u64(input.utxo.value);
        stream.push_u32(input.n_sequence);
        stream.push_bytes(&self.hash_outputs());
        stream.push_u32(self.locktime);
        stream.push_u32(SIGHASH_ALL as u32);

        Ok(double_sha256(stream.as_bytes()))
    }

    fn push_body(&self, stream: &mut SerializerStream) {
        stream.push_var_int(self.inputs.len() as u64);
        for input in &self.inputs {
            input.push_outpoint(stream);
            // scriptSig is empty for native segwit spends.
            stream.push_var_int(0);
            stream.push_u32(input.n_sequence);
        }

        stream.push_var_int(self.outputs.len() as u64);
        for output in &self.outputs {
            output.push(stream);
        }
    }

    /// Full BIP-144 serialization with witnesses, ready for broadcast.
    pub fn serialize(&self) -> Result<Vec<u8>, BtcError> {
        if self.inputs.is_empty() || self.outputs.is_empty() {
            return Err(BtcError::TransactionBuildError(
                "transaction needs at least one input and one output".into(),
            ));
        }
        if let Some(index) = self.inputs.iter().position(|i| !i.is_signed()) {
            return Err(BtcError::TransactionBuildError(format!(
                "input {index} is not signed"
            )));
        }

        let mut stream = SerializerStream::new();
        stream.push_u32(TX_VERSION);
        stream.push_u8(SEGWIT_MARKER);
        stream.push_u8(SEGWIT_FLAG);
        self.push_body(&mut stream);
        for input in &self.inputs {
            stream.push_var_int(2);
            stream.push_size_and_bytes(&input.signature);
            stream.push_size_and_bytes(&input.pubkey);
        }
        stream.push_u32(self.locktime);

        Ok(stream.into_bytes())
    }

    /// Display-order txid: double-SHA256 of the serialization without
    /// marker, flag and witnesses.
    pub fn txid(&self) -> Txid {
        let mut stream = SerializerStream::new();
        stream.push_u32(TX_VERSION);
        self.push_body(&mut stream);
        stream.push_u32(self.locktime);

        let mut txid = double_sha256(stream.as_bytes());
        txid.reverse();
        txid
    }
}
