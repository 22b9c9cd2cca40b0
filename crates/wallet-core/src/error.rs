use thiserror::Error;

use crate::rpc::RpcError;

/// Errors reported to wallet callers. The send workflow variants carry the
/// user-facing text of the stage that failed.
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("Invalid chain height")]
    InvalidChainHeight,

    #[error("No outputs to spend")]
    NoOutputsToSpend,

    #[error("Couldn't pick transaction inputs")]
    PickInputsFailed,

    #[error("Couldn't prepare outputs")]
    PrepareOutputsFailed,

    #[error("Couldn't fill signatures")]
    FillSignaturesFailed,

    #[error("Couldn't serialize transaction")]
    SerializeFailed,

    /// RPC error text, passed through unchanged.
    #[error("{0}")]
    Rpc(String),

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Synchronizer is not running")]
    SyncStopped,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RpcError> for WalletError {
    fn from(e: RpcError) -> Self {
        WalletError::Rpc(e.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_stage_messages() {
        assert_eq!(WalletError::InvalidChainHeight.to_string(), "Invalid chain height");
        assert_eq!(WalletError::NoOutputsToSpend.to_string(), "No outputs to spend");
        assert_eq!(
            WalletError::PickInputsFailed.to_string(),
            "Couldn't pick transaction inputs"
        );
        assert_eq!(
            WalletError::PrepareOutputsFailed.to_string(),
            "Couldn't prepare outputs"
        );
        assert_eq!(
            WalletError::FillSignaturesFailed.to_string(),
            "Couldn't fill signatures"
        );
        assert_eq!(
            WalletError::SerializeFailed.to_string(),
            "Couldn't serialize transaction"
        );
    }

    #[test]
    fn rpc_error_is_passed_through_verbatim() {
        let err: WalletError = RpcError("sendrawtransaction RPC error: bad-txns-inputs-missingorspent".into()).into();
        assert_eq!(
            err.to_string(),
            "sendrawtransaction RPC error: bad-txns-inputs-missingorspent"
        );
    }

    #[test]
    fn display_unknown_account() {
        let err = WalletError::UnknownAccount("testnet/3".into());
        assert_eq!(err.to_string(), "Unknown account: testnet/3");
    }

    #[test]
    fn display_invalid_config() {
        let err = WalletError::InvalidConfig("poll_interval_secs must be positive".into());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: poll_interval_secs must be positive"
        );
    }

    #[test]
    fn debug_format_works() {
        let debug = format!("{:?}", WalletError::SyncStopped);
        assert!(debug.contains("SyncStopped"));
    }
}
