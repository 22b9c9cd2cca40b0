use crate::error::BtcError;
use crate::types::Output;

/// Result of UTXO selection: the chosen UTXOs and their aggregate value.
#[derive(Debug, Clone)]
pub struct UtxoSelection {
    /// The selected UTXOs, in the order they were offered.
    pub selected: Vec<Output>,
    /// Total value of the selected UTXOs in satoshis.
    pub total_sat: u64,
}

impl UtxoSelection {
    /// Value left over after paying `target_sat`.
    pub fn change_sat(&self, target_sat: u64) -> u64 {
        self.total_sat.saturating_sub(target_sat)
    }
}

/// Select UTXOs to cover `target_sat` (amount plus fee).
///
/// Greedy first-fit: UTXOs are taken in the order given until the running
/// total reaches the target. No attempt is made to minimise the input count
/// or avoid dust, so `[1000, 2000, 3000]` for a target of 2500 picks the
/// first two.
pub fn select_utxos(utxos: &[Output], target_sat: u64) -> Result<UtxoSelection, BtcError> {
    if utxos.is_empty() {
        return Err(BtcError::TransactionBuildError("no UTXOs available".into()));
    }

    let mut selected = Vec::new();
    let mut total_sat: u64 = 0;

    // At least one input is always taken, even for a zero target.
    for utxo in utxos {
        selected.push(utxo.clone());
        total_sat = total_sat.saturating_add(utxo.value);
        if total_sat >= target_sat {
            break;
        }
    }

    if total_sat < target_sat {
        return Err(BtcError::InsufficientFunds {
            available: total_sat,
            required: target_sat,
        });
    }

    Ok(UtxoSelection { selected, total_sat })
}
