//! Bitcoin wallet pipeline: keeps per-network UTXO ledgers in sync with a
//! chain indexer and builds, signs and broadcasts P2WPKH payments.
//!
//! Keys stay behind the [`Keyring`] trait and chain access behind
//! [`ChainRpc`]; [`EsploraRpc`] is the HTTP implementation.

pub mod account;
pub mod config;
pub mod error;
pub mod esplora;
pub mod keyring;
pub mod ledger;
pub mod mocks;
pub mod rpc;
pub mod send_to;
pub mod service;
pub mod synchronizer;

pub use account::{AccountInfo, AccountInfoProjector, AddressInfo};
pub use chain_btc::BtcNetwork;
pub use config::WalletConfig;
pub use error::WalletError;
pub use esplora::EsploraRpc;
pub use keyring::{AccountId, BitcoinAddress, Keyring};
pub use ledger::{SharedLedger, TransactionLedger};
pub use rpc::{ChainRpc, RpcError, RpcResult};
pub use send_to::{SendToContext, SendToOrchestrator, SendToState};
pub use service::BitcoinWalletService;
pub use synchronizer::{ChainSynchronizer, SynchronizerHandle, WatchedAddressData};
