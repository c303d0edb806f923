//! Dummy UTXO lifecycle
//!
//! Every purchase consumes exactly one disposable, asset-free UTXO below
//! the configured dummy threshold as a non-traceable extra input, so sale
//! outputs cannot be trivially correlated with payment inputs. The spent
//! dummy is always replaced: the purchase assembler unconditionally
//! appends one dummy-value output back to the payer.

use log::debug;

use crate::config::MarketConfig;
use crate::error::Result;
use crate::rpc::AssetIndex;
use crate::utxo::{DummyUtxo, Utxo};

/// Scan the payer's UTXOs for a usable dummy.
///
/// Candidates are the UTXOs with value at or below `threshold`, probed in
/// ascending value order against the asset index; the first one the index
/// confirms inscription-free wins. Returns `None` when no candidate
/// exists or none is clean. A failed probe propagates as an error rather
/// than marking the candidate clean.
pub async fn find_dummy(
    asset_index: &dyn AssetIndex,
    payer_utxos: &[Utxo],
    threshold: u64,
) -> Result<Option<DummyUtxo>> {
    let mut candidates: Vec<&Utxo> = payer_utxos
        .iter()
        .filter(|utxo| utxo.value <= threshold)
        .collect();
    candidates.sort_by_key(|utxo| utxo.value);

    for candidate in candidates {
        if asset_index
            .utxo_contains_inscription(&candidate.outpoint())
            .await?
        {
            debug!(
                "dummy candidate {} carries an inscription, skipping",
                candidate.outpoint()
            );
            continue;
        }
        debug!("using dummy UTXO {}", candidate.outpoint());
        return Ok(Some(DummyUtxo(candidate.clone())));
    }

    Ok(None)
}

/// Minimum value and extra transaction shape for the next step of the
/// purchase flow.
///
/// With a dummy on hand the next transaction is the purchase itself:
/// the target must cover the asking price plus the replacement dummies,
/// with one extra input (the seller's) and the receiver/seller outputs
/// beyond the minted dummies. Without one, the next transaction is the
/// dummy-minting sub-flow, which only needs to fund the minted dummies.
///
/// Returns `(min_value, extra_inputs, extra_outputs)` for
/// [`crate::utxo::select_payment_utxos`].
pub fn purchase_requirements(
    dummy: Option<&DummyUtxo>,
    price: u64,
    config: &MarketConfig,
) -> (u64, usize, usize) {
    let mint_value = config.dummy_utxos_to_create as u64 * config.dummy_utxo_value;
    match dummy {
        Some(_) => (price + mint_value, 1, 2 + config.dummy_utxos_to_create),
        None => (mint_value, 0, config.dummy_utxos_to_create),
    }
}
