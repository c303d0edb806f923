//! Order records and seller-PSBT validation
//!
//! Orders arrive from an opaque feed as JSON records carrying tagged
//! metadata and a base64 seller-signed PSBT. Validation re-derives every
//! claim the order makes against current chain state: the PSBT must spend
//! exactly the UTXO that holds the inscription, must spend nothing else,
//! and must actually carry the seller's signature. Each gate is hard; a
//! detected mismatch is never downgraded to a warning.

use bitcoin::{OutPoint, Psbt};
use log::debug;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{MarketError, Result};
use crate::rpc::AssetIndex;

/// A marketplace order record as transmitted by the order feed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Order {
    /// Tagged metadata: `[[key, value], ...]`
    pub tags: Vec<Vec<String>>,
    /// Base64-encoded seller-signed PSBT
    pub content: String,
    /// Creation timestamp (unix seconds)
    #[serde(default)]
    pub created_at: u64,
}

impl Order {
    fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(key))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }

    /// Whether this record is a sale order at all ("s" tag present).
    pub fn is_sale_order(&self) -> bool {
        self.tag("s").is_some()
    }

    /// The inscription this order claims to sell ("i" tag).
    pub fn inscription_id(&self) -> Option<&str> {
        self.tag("i")
    }
}

/// An order that passed every validation gate.
#[derive(Clone, Debug)]
pub struct ValidatedOrder {
    /// Inscription being sold
    pub inscription_id: String,
    /// Asking price in satoshis (the seller PSBT's first output)
    pub price: u64,
    /// UTXO currently holding the inscription
    pub asset_output: OutPoint,
    /// Value of that UTXO in satoshis
    pub asset_value: u64,
    /// The decoded seller-signed PSBT
    pub seller_psbt: Psbt,
}

/// Structured classification of a seller PSBT's finalizability.
///
/// A listing PSBT deliberately spends less than its outputs claim (the
/// buyer has not yet added payment inputs), so the overspend case is
/// expected and benign. rust-bitcoin reports it as
/// `ExtractTxError::SendingTooMuch` during extraction but does not check
/// for missing signatures at all, so the classification is derived from
/// the PSBT fields directly instead of from extraction errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinalizeCheck {
    /// Fully signed and balanced
    Finalized,
    /// Signed, but outputs exceed inputs (expected for listings)
    Overspend,
    /// No signature material on the input
    NotSigned,
    /// Anything else that prevents finalization
    Other(String),
}

/// Classify whether a single-input seller PSBT could be finalized.
pub fn classify_finalize(psbt: &Psbt) -> FinalizeCheck {
    let input = match psbt.inputs.first() {
        Some(input) => input,
        None => return FinalizeCheck::Other("PSBT has no inputs".to_string()),
    };

    let signed = input.final_script_witness.is_some()
        || input.final_script_sig.is_some()
        || input.tap_key_sig.is_some()
        || !input.tap_script_sigs.is_empty()
        || !input.partial_sigs.is_empty();
    if !signed {
        return FinalizeCheck::NotSigned;
    }

    let input_value = match input.witness_utxo.as_ref().map(|txout| txout.value) {
        Some(value) => value,
        None => {
            let prevout = psbt.unsigned_tx.input[0].previous_output;
            match input
                .non_witness_utxo
                .as_ref()
                .and_then(|tx| tx.output.get(prevout.vout as usize))
            {
                Some(txout) => txout.value,
                None => return FinalizeCheck::Other("missing input value".to_string()),
            }
        }
    };

    let output_total: u64 = psbt
        .unsigned_tx
        .output
        .iter()
        .map(|txout| txout.value.to_sat())
        .sum();

    if output_total > input_value.to_sat() {
        FinalizeCheck::Overspend
    } else {
        FinalizeCheck::Finalized
    }
}

/// Validate a marketplace order against current chain state.
///
/// `expected_number`, when supplied, must match the inscription number the
/// index resolves. This catches cross-network confusion (a signet order
/// validated against a mainnet index and vice versa).
pub async fn validate_order(
    asset_index: &dyn AssetIndex,
    order: &Order,
    expected_number: Option<i64>,
) -> Result<ValidatedOrder> {
    let inscription_id = order
        .inscription_id()
        .ok_or_else(|| MarketError::MalformedOrder("missing inscription tag".to_string()))?
        .to_string();

    let inscription = asset_index
        .inscription_by_id(&inscription_id)
        .await
        .map_err(|err| {
            debug!("inscription lookup failed: {err:#}");
            MarketError::AssetNotFound {
                id: inscription_id.clone(),
            }
        })?;

    if let Some(expected) = expected_number {
        if inscription.number != expected {
            return Err(MarketError::AssetNotFound { id: inscription_id });
        }
    }

    let psbt = Psbt::from_str(&order.content)
        .map_err(|err| MarketError::MalformedPsbt(err.to_string()))?;

    let claimed_input = psbt
        .unsigned_tx
        .input
        .first()
        .map(|txin| txin.previous_output)
        .ok_or_else(|| MarketError::InvalidSellerPsbt("PSBT has no inputs".to_string()))?;

    if claimed_input != inscription.output {
        return Err(MarketError::AssetMismatch {
            psbt_input: claimed_input.to_string(),
            asset_output: inscription.output.to_string(),
        });
    }

    // multi-input seller PSBTs could smuggle additional unintended spends
    if psbt.unsigned_tx.input.len() != 1 {
        return Err(MarketError::InvalidSellerPsbt(
            "seller PSBT must spend exactly one input".to_string(),
        ));
    }

    match classify_finalize(&psbt) {
        FinalizeCheck::Finalized | FinalizeCheck::Overspend => {}
        FinalizeCheck::NotSigned => {
            return Err(MarketError::InvalidSellerPsbt("PSBT not signed".to_string()))
        }
        FinalizeCheck::Other(reason) => return Err(MarketError::InvalidSellerPsbt(reason)),
    }

    let price = psbt
        .unsigned_tx
        .output
        .first()
        .map(|txout| txout.value.to_sat())
        .ok_or_else(|| MarketError::InvalidSellerPsbt("PSBT has no outputs".to_string()))?;

    debug!(
        "validated order for {}: price {} sat, asset at {}",
        inscription_id, price, inscription.output
    );

    Ok(ValidatedOrder {
        inscription_id,
        price,
        asset_output: inscription.output,
        asset_value: inscription.value,
        seller_psbt: psbt,
    })
}
