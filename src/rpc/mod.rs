//! External collaborators
//!
//! The engine talks to the outside world through capability traits so the
//! validation and assembly logic can be tested with deterministic fakes:
//! - [`ChainProvider`]: chain/UTXO lookups, fee rates and broadcast
//!   (esplora-style HTTP API, see [`esplora`])
//! - [`AssetIndex`]: inscription lookups against an ordinals explorer
//!   (see [`ord`])
//!
//! Failures propagate immediately; there is no retry inside the engine.
//! The caller decides whether to retry the whole flow from UTXO
//! re-selection.

pub mod esplora;
pub mod ord;

use anyhow::Result;
use async_trait::async_trait;
use bitcoin::OutPoint;

use crate::utxo::Utxo;

pub use esplora::EsploraClient;
pub use ord::OrdClient;

/// Chain state, fee-rate and broadcast collaborator.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    /// Spendable UTXOs for an address.
    async fn get_address_utxos(&self, address: &str) -> Result<Vec<Utxo>>;

    /// Raw transaction hex by txid.
    async fn get_tx_hex(&self, txid: &bitcoin::Txid) -> Result<String>;

    /// Recommended next-block fee rate in sat/vB.
    async fn recommended_fee_rate(&self) -> Result<u64>;

    /// Submit a raw transaction. Returns the txid on acceptance; errors
    /// carry the provider's rejection reason.
    async fn broadcast(&self, raw_tx_hex: &str) -> Result<String>;
}

/// Current on-chain facts about an inscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InscriptionData {
    /// Inscription number assigned by the index (negative for cursed)
    pub number: i64,
    /// UTXO currently holding the inscription
    pub output: OutPoint,
    /// Value of that UTXO in satoshis
    pub value: u64,
}

/// Ordinals index collaborator.
#[async_trait]
pub trait AssetIndex: Send + Sync {
    /// Resolve an inscription id to its current owning UTXO.
    async fn inscription_by_id(&self, inscription_id: &str) -> Result<InscriptionData>;

    /// Whether any inscription lives on the given outpoint.
    async fn utxo_contains_inscription(&self, outpoint: &OutPoint) -> Result<bool>;
}
