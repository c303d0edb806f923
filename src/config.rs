//! Marketplace configuration
//!
//! Tunable constants for the engine: dummy UTXO sizing, fee-rate fallback
//! and network selection. Nothing in the core logic hardcodes these.

use bitcoin::Network;

/// Marketplace engine configuration.
#[derive(Clone, Debug)]
pub struct MarketConfig {
    /// Bitcoin network (mainnet, testnet, signet, regtest)
    pub network: Network,
    /// Value of a dummy "glue" UTXO in satoshis. UTXOs at or below this
    /// value are dummy candidates.
    pub dummy_utxo_value: u64,
    /// Number of dummy UTXOs minted by the dummy-generation sub-flow.
    pub dummy_utxos_to_create: usize,
    /// Fee rate in sat/vB used when the fee-rate provider is unavailable.
    pub default_fee_rate: u64,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            dummy_utxo_value: 600,
            dummy_utxos_to_create: 1,
            default_fee_rate: 7,
        }
    }
}

impl MarketConfig {
    /// Default configuration for a network.
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            ..Self::default()
        }
    }
}

/// Parse a provider preset name into a network.
pub fn network_from_provider(provider: &str) -> Result<Network, String> {
    match provider.to_lowercase().as_str() {
        "mainnet" => Ok(Network::Bitcoin),
        "testnet" => Ok(Network::Testnet),
        "signet" => Ok(Network::Signet),
        "regtest" | "localhost" => Ok(Network::Regtest),
        _ => Err(format!(
            "Unknown provider: {}. Supported networks: mainnet, testnet, signet, regtest",
            provider
        )),
    }
}

/// Get the esplora API URL for a given provider preset.
pub fn esplora_url(provider: &str) -> String {
    match provider {
        "mainnet" => "https://mempool.space/api".to_string(),
        "testnet" => "https://mempool.space/testnet/api".to_string(),
        "signet" => "https://mempool.space/signet/api".to_string(),
        "localhost" | "regtest" => "http://localhost:3002".to_string(),
        url if url.starts_with("http://") || url.starts_with("https://") => url.to_string(),
        _ => "https://mempool.space/api".to_string(),
    }
}

/// Get the ordinals explorer URL for a given provider preset.
pub fn ord_url(provider: &str) -> String {
    match provider {
        "mainnet" => "https://ordinals.com".to_string(),
        "testnet" => "https://testnet.ordinals.com".to_string(),
        "signet" => "https://signet.ordinals.com".to_string(),
        "localhost" | "regtest" => "http://localhost:8080".to_string(),
        url if url.starts_with("http://") || url.starts_with("https://") => url.to_string(),
        _ => "https://ordinals.com".to_string(),
    }
}
