//! Error taxonomy for order validation, assembly and signing
//!
//! Every validation and assembly failure is terminal for the current
//! attempt. Errors carry enough structured detail (amounts, ids) for the
//! caller to decide on remediation or user messaging.

use thiserror::Error;

/// Errors produced by the marketplace engine.
#[derive(Debug, Error)]
pub enum MarketError {
    /// The order record is missing required tag metadata.
    #[error("malformed order: {0}")]
    MalformedOrder(String),

    /// The inscription could not be resolved by the asset index, or the
    /// resolved inscription number does not match the expected one.
    #[error("inscription {id} not found (maybe you're on signet and looking for a mainnet inscription or vice versa)")]
    AssetNotFound { id: String },

    /// The seller PSBT's claimed input does not spend the UTXO that
    /// currently holds the inscription. Always fatal.
    #[error("seller signed PSBT does not match this inscription: spends {psbt_input}, asset is at {asset_output}")]
    AssetMismatch {
        psbt_input: String,
        asset_output: String,
    },

    /// The seller PSBT is structurally wrong or not actually signed.
    #[error("invalid seller PSBT: {0}")]
    InvalidSellerPsbt(String),

    /// The PSBT blob could not be decoded at all.
    #[error("failed to decode PSBT: {0}")]
    MalformedPsbt(String),

    /// The payer cannot cover price + fees. All amounts in satoshis.
    #[error("insufficient funds: price {price} sat, fees {fees} sat, available {available} sat, missing {missing} sat")]
    InsufficientFunds {
        price: u64,
        fees: u64,
        available: u64,
        missing: u64,
    },

    /// No signer capability was provided.
    #[error("no signer available")]
    SignerUnavailable,

    /// The broadcast collaborator rejected the raw transaction. The
    /// collaborator's reason is surfaced verbatim.
    #[error("broadcast rejected: {reason}")]
    BroadcastRejected { reason: String },

    /// Transport or provider failure from an external collaborator.
    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, MarketError>;
