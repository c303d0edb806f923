//! UTXO model and payment UTXO selection
//!
//! The selector accumulates spendable UTXOs until the target plus the
//! (recomputed) fee for the selection's own size is covered. UTXOs known
//! to carry an inscription are never selected.

use bitcoin::{OutPoint, Txid};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{MarketError, Result};
use crate::fee::estimate_for_selection;

/// An unspent transaction output as observed on-chain.
///
/// Identity is (txid, vout). Immutable once observed; it leaves the
/// spendable set as soon as a transaction spending it is broadcast.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Transaction ID
    pub txid: Txid,
    /// Output index
    pub vout: u32,
    /// Output value in satoshis
    pub value: u64,
    /// Confirmation status
    pub confirmed: bool,
    /// Block time (if confirmed)
    pub block_time: Option<u64>,
    /// Block height (if confirmed)
    pub block_height: Option<u64>,
    /// Inscription known to live on this output, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inscription_id: Option<String>,
}

impl Utxo {
    /// The outpoint spending this UTXO.
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid, self.vout)
    }
}

/// A low-value, inscription-free UTXO reserved as transaction "glue".
///
/// Only the dummy manager constructs these, after the asset-free probe
/// has confirmed the candidate clean.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DummyUtxo(pub Utxo);

impl DummyUtxo {
    /// Value of the underlying UTXO in satoshis.
    pub fn value(&self) -> u64 {
        self.0.value
    }

    /// The outpoint of the underlying UTXO.
    pub fn outpoint(&self) -> OutPoint {
        self.0.outpoint()
    }
}

/// Result of payment UTXO selection. Ephemeral: recomputed from fresh
/// chain state on every purchase attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentSelection {
    /// Selected UTXOs, in selection order
    pub utxos: Vec<Utxo>,
    /// Sum of the selected values in satoshis
    pub total_value: u64,
}

/// Sort UTXOs largest-first.
///
/// The selector consumes candidates in caller order; callers that want a
/// minimal input count are expected to pre-sort with this.
pub fn sort_largest_first(utxos: &mut [Utxo]) {
    utxos.sort_by(|a, b| b.value.cmp(&a.value));
}

/// Select payment UTXOs covering `min_value` plus fees.
///
/// Iterates `utxos` in the order supplied, skipping any flagged as
/// inscription-bearing, and accumulates until the running total covers
/// `min_value` plus the fee for `extra_inputs + selected` inputs and
/// `extra_outputs` outputs at `fee_rate`. The fee estimate is recomputed
/// as each UTXO is added, since every added input raises the fee.
///
/// Fails with [`MarketError::InsufficientFunds`] reporting the shortfall
/// when the whole set is exhausted before the target is met.
pub fn select_payment_utxos(
    utxos: &[Utxo],
    min_value: u64,
    extra_inputs: usize,
    extra_outputs: usize,
    fee_rate: u64,
) -> Result<PaymentSelection> {
    let mut selected: Vec<Utxo> = Vec::new();
    let mut total_value = 0u64;
    let mut fee = estimate_for_selection(extra_inputs, extra_outputs, fee_rate);

    for utxo in utxos {
        if utxo.inscription_id.is_some() {
            debug!(
                "skipping inscription-bearing UTXO {}:{}",
                utxo.txid, utxo.vout
            );
            continue;
        }

        selected.push(utxo.clone());
        total_value += utxo.value;
        fee = estimate_for_selection(extra_inputs + selected.len(), extra_outputs, fee_rate);

        if total_value >= min_value + fee {
            debug!(
                "selected {} UTXOs totalling {} sat for target {} + fee {}",
                selected.len(),
                total_value,
                min_value,
                fee
            );
            return Ok(PaymentSelection {
                utxos: selected,
                total_value,
            });
        }
    }

    let required = min_value + fee;
    Err(MarketError::InsufficientFunds {
        price: min_value,
        fees: fee,
        available: total_value,
        missing: required.saturating_sub(total_value),
    })
}
