//! Bitcoin primitives for the wallet pipeline.
//!
//! CompactSize serialization, address decoding, observed transaction types,
//! greedy UTXO selection, and P2WPKH spending transactions with BIP-143
//! signature hashes and BIP-144 wire serialization.

pub mod address;
pub mod error;
pub mod hash;
pub mod network;
pub mod serializer;
pub mod transaction;
pub mod types;
pub mod utxo;

pub use error::BtcError;
pub use network::BtcNetwork;
