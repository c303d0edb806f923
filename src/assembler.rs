//! PSBT assembly
//!
//! Builds the three transaction shapes the marketplace uses:
//! - the seller's listing PSBT (asset input -> payment output),
//! - the buyer's purchase PSBT merging the seller's signed input/output
//!   pair with the buyer's dummy, payment and change legs,
//! - the dummy-minting PSBT that replenishes glue UTXOs.
//!
//! The purchase input/output order is fixed and reproduced exactly:
//! both parties' signatures bind to positions, so moving a leg would
//! invalidate the seller's SIGHASH_SINGLE|ANYONECANPAY commitment.

use bitcoin::absolute::LockTime;
use bitcoin::psbt::PsbtSighashType;
use bitcoin::sighash::TapSighashType;
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, OutPoint, Psbt, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid,
    Witness, XOnlyPublicKey,
};
use log::{debug, info};
use secp256k1::Secp256k1;

use crate::config::MarketConfig;
use crate::error::{MarketError, Result};
use crate::fee::final_fee;
use crate::order::ValidatedOrder;
use crate::rpc::ChainProvider;
use crate::utxo::{DummyUtxo, PaymentSelection, Utxo};

/// The UTXO currently holding the asset being listed.
#[derive(Clone, Debug)]
pub struct AssetOutput {
    /// Outpoint of the asset UTXO
    pub outpoint: OutPoint,
    /// Its value in satoshis
    pub value: u64,
}

fn unsigned_input(previous_output: OutPoint) -> TxIn {
    TxIn {
        previous_output,
        script_sig: ScriptBuf::new(),
        sequence: Sequence::MAX,
        witness: Witness::default(),
    }
}

fn output(value: u64, script_pubkey: ScriptBuf) -> TxOut {
    TxOut {
        value: Amount::from_sat(value),
        script_pubkey,
    }
}

fn unsigned_tx(input: Vec<TxIn>, output: Vec<TxOut>) -> Transaction {
    Transaction {
        version: Version(2),
        lock_time: LockTime::ZERO,
        input,
        output,
    }
}

/// Fetch the transaction funding `txid` for use as a `non_witness_utxo`,
/// with input witnesses stripped (they are not needed to describe the
/// prevout and bloat the PSBT).
async fn fetch_prevout_tx(chain: &dyn ChainProvider, txid: &Txid) -> Result<Transaction> {
    let hex = chain.get_tx_hex(txid).await?;
    let bytes = hex::decode(hex.trim())
        .map_err(|err| MarketError::MalformedPsbt(format!("invalid tx hex for {txid}: {err}")))?;
    let mut tx: Transaction = bitcoin::consensus::deserialize(&bytes)
        .map_err(|err| MarketError::MalformedPsbt(format!("invalid tx for {txid}: {err}")))?;
    for input in &mut tx.input {
        input.witness = Witness::default();
    }
    Ok(tx)
}

/// Build the seller's listing PSBT: one input (the asset UTXO), one
/// output (the asking price to the seller's payout address).
///
/// The input carries a witness UTXO bound to the seller's own P2TR
/// script, the seller's x-only key as taproot internal key, and
/// SIGHASH_SINGLE|ANYONECANPAY so the signature stays valid when the
/// buyer splices the pair into the purchase transaction at the fixed
/// position.
pub fn build_listing_psbt(
    asset: &AssetOutput,
    price: u64,
    payout_address: &Address,
    seller_key: &XOnlyPublicKey,
) -> Result<Psbt> {
    let secp = Secp256k1::verification_only();
    let seller_script = ScriptBuf::new_p2tr(&secp, *seller_key, None);

    let tx = unsigned_tx(
        vec![unsigned_input(asset.outpoint)],
        vec![output(price, payout_address.script_pubkey())],
    );

    let mut psbt = Psbt::from_unsigned_tx(tx)
        .map_err(|err| MarketError::MalformedPsbt(err.to_string()))?;
    psbt.inputs[0].witness_utxo = Some(output(asset.value, seller_script));
    psbt.inputs[0].tap_internal_key = Some(*seller_key);
    psbt.inputs[0].sighash_type =
        Some(PsbtSighashType::from(TapSighashType::SinglePlusAnyoneCanPay));

    debug!(
        "built listing PSBT for {} at {} sat",
        asset.outpoint, price
    );
    Ok(psbt)
}

/// Describe a buyer-owned taproot input on `psbt` at `index`.
async fn describe_buyer_input(
    chain: &dyn ChainProvider,
    psbt: &mut Psbt,
    index: usize,
    utxo: &Utxo,
    payer_script: &ScriptBuf,
    buyer_key: &XOnlyPublicKey,
) -> Result<()> {
    psbt.inputs[index].non_witness_utxo = Some(fetch_prevout_tx(chain, &utxo.txid).await?);
    psbt.inputs[index].witness_utxo = Some(output(utxo.value, payer_script.clone()));
    psbt.inputs[index].tap_internal_key = Some(*buyer_key);
    Ok(())
}

/// Build the buyer's purchase PSBT.
///
/// Input/output order is fixed:
/// - input 0: the dummy UTXO (buyer-signed)
/// - output 0: receiver output worth dummy value + asset value
/// - input 1: the seller's signed input, copied verbatim
/// - output 1: the seller's payment output, copied verbatim
/// - inputs 2..: the selected payment UTXOs (buyer-signed)
/// - next output: a fresh dummy-value output back to the payer
/// - last output: change
///
/// Change is `total payment value - dummy value - price - fee`, with the
/// fee computed from the final actual input/output counts. A negative
/// change is [`MarketError::InsufficientFunds`]; the transaction is never
/// assembled in that case.
#[allow(clippy::too_many_arguments)]
pub async fn build_purchase_psbt(
    chain: &dyn ChainProvider,
    order: &ValidatedOrder,
    dummy: &DummyUtxo,
    selection: &PaymentSelection,
    receiver_address: &Address,
    payer_address: &Address,
    buyer_key: &XOnlyPublicKey,
    fee_rate: u64,
    config: &MarketConfig,
) -> Result<Psbt> {
    let payer_script = payer_address.script_pubkey();

    let seller_input = order.seller_psbt.unsigned_tx.input[0].clone();
    let seller_output = order.seller_psbt.unsigned_tx.output[0].clone();

    let mut inputs = vec![unsigned_input(dummy.outpoint()), seller_input];
    inputs.extend(selection.utxos.iter().map(|utxo| unsigned_input(utxo.outpoint())));

    let input_count = inputs.len();
    let output_count = 4; // receiver, seller, fresh dummy, change
    let fee = final_fee(input_count, output_count, fee_rate);

    let required = order.price + config.dummy_utxo_value + fee;
    if selection.total_value < required {
        return Err(MarketError::InsufficientFunds {
            price: order.price,
            fees: fee + config.dummy_utxo_value,
            available: selection.total_value,
            missing: required - selection.total_value,
        });
    }
    let change = selection.total_value - config.dummy_utxo_value - order.price - fee;

    let outputs = vec![
        // the asset lands on the receiver at this position
        output(
            dummy.value() + order.asset_value,
            receiver_address.script_pubkey(),
        ),
        seller_output,
        // glue replenishment: one dummy back to the payer, always
        output(config.dummy_utxo_value, payer_script.clone()),
        output(change, payer_script.clone()),
    ];

    let mut psbt = Psbt::from_unsigned_tx(unsigned_tx(inputs, outputs))
        .map_err(|err| MarketError::MalformedPsbt(err.to_string()))?;

    describe_buyer_input(chain, &mut psbt, 0, &dummy.0, &payer_script, buyer_key).await?;
    psbt.inputs[1] = order.seller_psbt.inputs[0].clone();
    for (offset, utxo) in selection.utxos.iter().enumerate() {
        describe_buyer_input(chain, &mut psbt, 2 + offset, utxo, &payer_script, buyer_key)
            .await?;
    }

    info!(
        "assembled purchase PSBT for {}: {} inputs, {} outputs, fee {} sat, change {} sat",
        order.inscription_id, input_count, output_count, fee, change
    );
    Ok(psbt)
}

/// Build the dummy-minting PSBT: all selected payment UTXOs in, the
/// configured number of dummy-value outputs plus change back to the
/// payer.
pub fn build_dummy_mint_psbt(
    selection: &PaymentSelection,
    payer_address: &Address,
    buyer_key: &XOnlyPublicKey,
    fee_rate: u64,
    config: &MarketConfig,
) -> Result<Psbt> {
    let payer_script = payer_address.script_pubkey();

    let inputs: Vec<TxIn> = selection
        .utxos
        .iter()
        .map(|utxo| unsigned_input(utxo.outpoint()))
        .collect();

    let mint_count = config.dummy_utxos_to_create;
    let mint_value = mint_count as u64 * config.dummy_utxo_value;
    let fee = final_fee(inputs.len(), mint_count + 1, fee_rate);

    let required = mint_value + fee;
    if selection.total_value < required {
        return Err(MarketError::InsufficientFunds {
            price: mint_value,
            fees: fee,
            available: selection.total_value,
            missing: required - selection.total_value,
        });
    }

    let mut outputs: Vec<TxOut> = (0..mint_count)
        .map(|_| output(config.dummy_utxo_value, payer_script.clone()))
        .collect();
    outputs.push(output(
        selection.total_value - mint_value - fee,
        payer_script.clone(),
    ));

    let mut psbt = Psbt::from_unsigned_tx(unsigned_tx(inputs, outputs))
        .map_err(|err| MarketError::MalformedPsbt(err.to_string()))?;
    for (index, utxo) in selection.utxos.iter().enumerate() {
        psbt.inputs[index].witness_utxo = Some(output(utxo.value, payer_script.clone()));
        psbt.inputs[index].tap_internal_key = Some(*buyer_key);
    }

    info!(
        "assembled dummy-mint PSBT: {} dummies of {} sat, fee {} sat",
        mint_count, config.dummy_utxo_value, fee
    );
    Ok(psbt)
}
