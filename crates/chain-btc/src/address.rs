use bitcoin::address::{Address, NetworkUnchecked};
use bitcoin::CompressedPublicKey;

use crate::error::BtcError;
use crate::network::BtcNetwork;

const OP_0: u8 = 0x00;
const OP_1: u8 = 0x51;
const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xa9;
const OP_EQUAL: u8 = 0x87;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xac;

/// Address kinds recognised by the decoder. Only `WitnessV0PubkeyHash`
/// can be spent to or from by the send pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    PubkeyHash,
    ScriptHash,
    WitnessV0PubkeyHash,
    WitnessV0ScriptHash,
    WitnessV1Taproot,
}

/// A parsed address: its type and the hash/program it commits to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAddress {
    pub address_type: AddressType,
    pub pubkey_hash: Vec<u8>,
}

/// Decode an address string for mainnet (`testnet == false`) or testnet.
///
/// Addresses for the other network fail with `InvalidAddress`; address
/// kinds without an `AddressType` fail with `UnsupportedAddressType`.
pub fn decode_address(address: &str, testnet: bool) -> Result<DecodedAddress, BtcError> {
    let network = if testnet {
        BtcNetwork::Testnet
    } else {
        BtcNetwork::Mainnet
    };

    let parsed: Address = address
        .parse::<Address<NetworkUnchecked>>()
        .map_err(|e| BtcError::InvalidAddress(format!("failed to parse address: {e}")))?
        .require_network(network.to_bitcoin_network())
        .map_err(|e| BtcError::InvalidAddress(format!("address for wrong network: {e}")))?;

    let script = parsed.script_pubkey();
    let bytes = script.as_bytes();
    let (address_type, hash) = match parsed.address_type() {
        Some(bitcoin::AddressType::P2pkh) => (AddressType::PubkeyHash, &bytes[3..23]),
        Some(bitcoin::AddressType::P2sh) => (AddressType::ScriptHash, &bytes[2..22]),
        Some(bitcoin::AddressType::P2wpkh) => (AddressType::WitnessV0PubkeyHash, &bytes[2..]),
        Some(bitcoin::AddressType::P2wsh) => (AddressType::WitnessV0ScriptHash, &bytes[2..]),
        Some(bitcoin::AddressType::P2tr) => (AddressType::WitnessV1Taproot, &bytes[2..]),
        _ => return Err(BtcError::UnsupportedAddressType(address.to_string())),
    };

    Ok(DecodedAddress {
        address_type,
        pubkey_hash: hash.to_vec(),
    })
}

/// Derive a P2WPKH (native SegWit bech32) address from a compressed public key.
///
/// Takes a 33-byte compressed secp256k1 public key and returns a bech32 address
/// string: `bc1...` for mainnet, `tb1...` for testnet.
pub fn pubkey_to_p2wpkh_address(pubkey_bytes: &[u8], network: BtcNetwork) -> Result<String, BtcError> {
    let compressed_pk = CompressedPublicKey::from_slice(pubkey_bytes).map_err(|e| {
        BtcError::InvalidPublicKey(format!("failed to parse compressed public key: {e}"))
    })?;

    let address = Address::p2wpkh(&compressed_pk, network.to_bitcoin_network());

    Ok(address.to_string())
}

/// `OP_0 <20-byte-hash>`
pub fn p2wpkh_script_pubkey(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(22);
    script.push(OP_0);
    script.push(0x14);
    script.extend_from_slice(pubkey_hash);
    script
}

/// BIP-143 scriptCode for a P2WPKH input, including its length prefix:
/// `0x19 OP_DUP OP_HASH160 <20-byte-hash> OP_EQUALVERIFY OP_CHECKSIG`.
pub fn p2wpkh_script_code(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(26);
    script.push(0x19);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    script.push(0x14);
    script.extend_from_slice(pubkey_hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

/// Script pubkey for a decoded address.
pub fn script_pubkey_for(decoded: &DecodedAddress) -> Vec<u8> {
    let hash = &decoded.pubkey_hash;
    let mut script = Vec::with_capacity(hash.len() + 5);
    match decoded.address_type {
        AddressType::PubkeyHash => {
            script.extend_from_slice(&[OP_DUP, OP_HASH160, hash.len() as u8]);
            script.extend_from_slice(hash);
            script.extend_from_slice(&[OP_EQUALVERIFY, OP_CHECKSIG]);
        }
        AddressType::ScriptHash => {
            script.extend_from_slice(&[OP_HASH160, hash.len() as u8]);
            script.extend_from_slice(hash);
            script.push(OP_EQUAL);
        }
        AddressType::WitnessV0PubkeyHash | AddressType::WitnessV0ScriptHash => {
            script.extend_from_slice(&[OP_0, hash.len() as u8]);
            script.extend_from_slice(hash);
        }
        AddressType::WitnessV1Taproot => {
            script.extend_from_slice(&[OP_1, hash.len() as u8]);
            script.extend_from_slice(hash);
        }
    }
    script
}
