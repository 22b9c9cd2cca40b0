use thiserror::Error;

/// Bitcoin primitive errors.
#[derive(Debug, Error)]
pub enum BtcError {
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("unsupported address type: {0}")]
    UnsupportedAddressType(String),

    #[error("invalid txid: {0}")]
    InvalidTxid(String),

    #[error("insufficient funds: have {available} sat, need {required} sat")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("transaction build error: {0}")]
    TransactionBuildError(String),
}
