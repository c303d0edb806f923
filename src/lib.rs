//! Ordinal marketplace order and PSBT assembly engine
//!
//! Trustless atomic swaps of inscribed UTXOs: a seller publishes a
//! partially-signed transaction offering an asset at a price, and a buyer
//! completes it by splicing the seller's signed input/output pair into a
//! purchase transaction at a fixed position, alongside a dummy "glue"
//! input, payment inputs and change.
//!
//! The engine is organised around a few collaborators:
//! - [`rpc::ChainProvider`] for chain state, fee rates and broadcast
//! - [`rpc::AssetIndex`] for inscription lookups
//! - [`signing::MarketSigner`] for schnorr signatures over sighash digests
//!
//! with [`market::Marketplace`] tying the flows together.

pub mod assembler;
pub mod config;
pub mod dummy;
pub mod error;
pub mod fee;
pub mod market;
pub mod order;
pub mod rpc;
pub mod signing;
pub mod utxo;

pub use config::MarketConfig;
pub use error::{MarketError, Result};
pub use market::{Marketplace, PurchaseContext};
pub use order::{FinalizeCheck, Order, ValidatedOrder};
pub use rpc::{AssetIndex, ChainProvider, EsploraClient, OrdClient};
pub use signing::{KeypairSigner, MarketSigner};
pub use utxo::{DummyUtxo, PaymentSelection, Utxo};
