//! Taproot key-spend signing, finalization and broadcast
//!
//! Signing is delegated through [`MarketSigner`] so transactions can be
//! signed by a local keypair or an external wallet that only exposes a
//! raw schnorr-sign-over-digest capability. The coordinator computes
//! BIP-341 sighashes here, hands out hex digests, and installs the
//! returned signatures on the PSBT.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::key::TapTweak;
use bitcoin::secp256k1::{schnorr, All, Keypair, Message, Secp256k1};
use bitcoin::sighash::{Prevouts, SighashCache, TapSighashType};
use bitcoin::{taproot, Psbt, Transaction, TxOut, Witness, XOnlyPublicKey};
use log::{debug, info};

use crate::error::{MarketError, Result};
use crate::rpc::ChainProvider;

/// Schnorr signing capability over raw 32-byte digests, hex in and out.
#[async_trait]
pub trait MarketSigner: Send + Sync {
    /// The x-only public key used as taproot internal key, hex-encoded.
    async fn public_key(&self) -> anyhow::Result<String>;

    /// Sign a hex-encoded 32-byte sighash, returning the 64-byte schnorr
    /// signature hex-encoded.
    async fn sign_schnorr(&self, sighash_hex: &str) -> anyhow::Result<String>;
}

/// In-process signer backed by a secp256k1 keypair.
///
/// Key-spend signatures are produced with the BIP-341 taproot tweak
/// applied; [`MarketSigner::public_key`] returns the untweaked internal
/// key, which is what addresses and PSBT fields carry.
pub struct KeypairSigner {
    secp: Secp256k1<All>,
    internal: Keypair,
    tweaked: Keypair,
}

impl KeypairSigner {
    pub fn from_secret_hex(secret_hex: &str) -> Result<Self> {
        let secp = Secp256k1::new();
        let internal = Keypair::from_seckey_str(&secp, secret_hex.trim())
            .map_err(|err| MarketError::Provider(anyhow!("invalid secret key: {err}")))?;
        let tweaked = internal.tap_tweak(&secp, None).to_inner();
        Ok(Self {
            secp,
            internal,
            tweaked,
        })
    }

    pub fn x_only_public_key(&self) -> XOnlyPublicKey {
        self.internal.x_only_public_key().0
    }
}

#[async_trait]
impl MarketSigner for KeypairSigner {
    async fn public_key(&self) -> anyhow::Result<String> {
        Ok(hex::encode(self.x_only_public_key().serialize()))
    }

    async fn sign_schnorr(&self, sighash_hex: &str) -> anyhow::Result<String> {
        let bytes = hex::decode(sighash_hex).context("invalid sighash hex")?;
        let digest: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow!("sighash must be 32 bytes, got {}", bytes.len()))?;
        let signature = self
            .secp
            .sign_schnorr(&Message::from_digest(digest), &self.tweaked);
        Ok(hex::encode(signature.serialize()))
    }
}

fn input_prevout(psbt: &Psbt, index: usize) -> Result<TxOut> {
    let input = &psbt.inputs[index];
    if let Some(txout) = &input.witness_utxo {
        return Ok(txout.clone());
    }
    if let Some(tx) = &input.non_witness_utxo {
        let vout = psbt.unsigned_tx.input[index].previous_output.vout as usize;
        if let Some(txout) = tx.output.get(vout) {
            return Ok(txout.clone());
        }
    }
    Err(MarketError::MalformedPsbt(format!(
        "input {index} has no prevout information"
    )))
}

fn input_sighash_type(psbt: &Psbt, index: usize) -> Result<TapSighashType> {
    match psbt.inputs[index].sighash_type {
        Some(ty) => ty.taproot_hash_ty().map_err(|err| {
            MarketError::MalformedPsbt(format!("input {index}: unsupported sighash: {err}"))
        }),
        None => Ok(TapSighashType::Default),
    }
}

fn is_anyone_can_pay(ty: TapSighashType) -> bool {
    matches!(
        ty,
        TapSighashType::AllPlusAnyoneCanPay
            | TapSighashType::NonePlusAnyoneCanPay
            | TapSighashType::SinglePlusAnyoneCanPay
    )
}

/// Sign every unsigned taproot key-spend input of `psbt` through
/// `signer`. Inputs that already carry a key-spend signature or a final
/// witness are left untouched, so a merged seller input passes through
/// unchanged.
pub async fn sign_psbt(psbt: &mut Psbt, signer: &dyn MarketSigner) -> Result<()> {
    let tx = psbt.unsigned_tx.clone();
    let prevouts: Vec<TxOut> = (0..psbt.inputs.len())
        .map(|index| input_prevout(psbt, index))
        .collect::<Result<_>>()?;
    let mut cache = SighashCache::new(&tx);

    for index in 0..psbt.inputs.len() {
        if psbt.inputs[index].final_script_witness.is_some()
            || psbt.inputs[index].tap_key_sig.is_some()
        {
            debug!("input {index} already signed, skipping");
            continue;
        }

        let sighash_type = input_sighash_type(psbt, index)?;
        let sighash = if is_anyone_can_pay(sighash_type) {
            cache.taproot_key_spend_signature_hash(
                index,
                &Prevouts::One(index, prevouts[index].clone()),
                sighash_type,
            )
        } else {
            cache.taproot_key_spend_signature_hash(
                index,
                &Prevouts::All(&prevouts),
                sighash_type,
            )
        }
        .map_err(|err| MarketError::MalformedPsbt(format!("input {index}: {err}")))?;

        let signature_hex = signer
            .sign_schnorr(&hex::encode(sighash.to_byte_array()))
            .await?;
        let signature_bytes = hex::decode(signature_hex.trim())
            .map_err(|err| MarketError::Provider(anyhow!("signer returned invalid hex: {err}")))?;
        let signature = schnorr::Signature::from_slice(&signature_bytes).map_err(|err| {
            MarketError::Provider(anyhow!("signer returned invalid signature: {err}"))
        })?;

        psbt.inputs[index].tap_key_sig = Some(taproot::Signature {
            signature,
            sighash_type,
        });
    }

    Ok(())
}

/// Convert every key-spend signature into a final script witness and
/// clear the now-redundant signing fields.
pub fn finalize_psbt(psbt: &mut Psbt) -> Result<()> {
    for (index, input) in psbt.inputs.iter_mut().enumerate() {
        if input.final_script_witness.is_some() {
            continue;
        }
        let signature = input.tap_key_sig.ok_or_else(|| {
            MarketError::MalformedPsbt(format!("input {index} is missing a signature"))
        })?;

        input.final_script_witness = Some(Witness::p2tr_key_spend(&signature));
        input.tap_key_sig = None;
        input.tap_internal_key = None;
        input.sighash_type = None;
        input.partial_sigs.clear();
        input.tap_script_sigs.clear();
    }
    Ok(())
}

/// Extract the fully-signed transaction from a finalized PSBT.
pub fn extract_transaction(psbt: Psbt) -> Result<Transaction> {
    psbt.extract_tx()
        .map_err(|err| MarketError::MalformedPsbt(err.to_string()))
}

/// Broadcast `tx`, mapping a node rejection to
/// [`MarketError::BroadcastRejected`] with the node's reason verbatim.
pub async fn broadcast_transaction(
    chain: &dyn ChainProvider,
    tx: &Transaction,
) -> Result<String> {
    let raw = hex::encode(bitcoin::consensus::encode::serialize(tx));
    let txid = chain
        .broadcast(&raw)
        .await
        .map_err(|err| MarketError::BroadcastRejected {
            reason: err.to_string(),
        })?;
    info!("broadcast transaction {txid}");
    Ok(txid)
}

/// Sign, finalize, extract and broadcast `psbt` in one pass, returning
/// the broadcast txid.
pub async fn sign_finalize_broadcast(
    mut psbt: Psbt,
    signer: &dyn MarketSigner,
    chain: &dyn ChainProvider,
) -> Result<String> {
    sign_psbt(&mut psbt, signer).await?;
    finalize_psbt(&mut psbt)?;
    let tx = extract_transaction(psbt)?;
    broadcast_transaction(chain, &tx).await
}
