//! ordmarket CLI
//!
//! Command-line front end for the marketplace engine: list an inscription
//! for sale, validate an order, buy one, mint dummy UTXOs, and inspect an
//! address's UTXO set.

use std::fs;
use std::io::Read;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use bitcoin::Address;
use clap::{Parser, Subcommand};
use log::info;
use secp256k1::Secp256k1;

use ordmarket::config::{esplora_url, network_from_provider, ord_url};
use ordmarket::{
    EsploraClient, KeypairSigner, MarketConfig, Marketplace, MarketSigner, Order, OrdClient,
};

#[derive(Parser)]
#[command(name = "ordmarket")]
#[command(about = "Ordinal marketplace order validation and PSBT assembly")]
#[command(version)]
struct Args {
    /// Network provider preset (mainnet, testnet, signet, localhost)
    #[arg(long, default_value = "mainnet")]
    provider: String,

    /// Esplora API URL (overrides the provider preset)
    #[arg(long)]
    esplora_url: Option<String>,

    /// Ord explorer URL (overrides the provider preset)
    #[arg(long)]
    ord_url: Option<String>,

    /// Hex-encoded signing key (or set ORDMARKET_KEY)
    #[arg(long, env = "ORDMARKET_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Dummy UTXO value in satoshis
    #[arg(long, default_value_t = 600)]
    dummy_value: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and sign a listing PSBT for an inscription you own
    List {
        /// Inscription id to list
        inscription_id: String,
        /// Asking price in satoshis
        #[arg(long)]
        price: u64,
        /// Address the sale proceeds go to
        #[arg(long)]
        payout: String,
    },
    /// Validate an order against current chain state
    Validate {
        /// Order JSON file, or - for stdin
        order: String,
        /// Expected inscription number
        #[arg(long)]
        number: Option<i64>,
    },
    /// Buy the asset an order offers
    Buy {
        /// Order JSON file, or - for stdin
        order: String,
        /// Address the asset lands on (defaults to the signer's address)
        #[arg(long)]
        receiver: Option<String>,
        /// Address payments come from (defaults to the signer's address)
        #[arg(long)]
        payer: Option<String>,
        /// Expected inscription number
        #[arg(long)]
        number: Option<i64>,
    },
    /// Mint fresh dummy UTXOs to the payer's address
    MintDummies {
        /// Address to mint to (defaults to the signer's address)
        #[arg(long)]
        payer: Option<String>,
        /// How many dummies to mint
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Show an address's UTXO set
    Utxos {
        /// Address to inspect
        address: String,
    },
}

fn read_order(source: &str) -> Result<Order> {
    let raw = if source == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read order from stdin")?;
        buffer
    } else {
        fs::read_to_string(source).with_context(|| format!("failed to read {source}"))?
    };
    let order: Order = serde_json::from_str(&raw).context("order is not valid JSON")?;
    if !order.is_sale_order() {
        return Err(anyhow!("record is not a sale order"));
    }
    Ok(order)
}

/// The signer's own P2TR address, used when no explicit address is given.
async fn signer_address(signer: &dyn MarketSigner, config: &MarketConfig) -> Result<String> {
    let key_hex = signer.public_key().await?;
    let key = bitcoin::XOnlyPublicKey::from_str(key_hex.trim())
        .map_err(|err| anyhow!("signer returned invalid key: {err}"))?;
    let secp = Secp256k1::verification_only();
    Ok(Address::p2tr(&secp, key, None, config.network).to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let network = network_from_provider(&args.provider).map_err(|err| anyhow!(err))?;
    let mut config = MarketConfig::for_network(network);
    config.dummy_utxo_value = args.dummy_value;

    let esplora = args
        .esplora_url
        .clone()
        .unwrap_or_else(|| esplora_url(&args.provider));
    let ord = args
        .ord_url
        .clone()
        .unwrap_or_else(|| ord_url(&args.provider));
    info!("using esplora {esplora} and ord explorer {ord} on {network}");

    let chain = Arc::new(EsploraClient::from_url(&esplora));
    let assets = Arc::new(OrdClient::from_url(&ord));
    let signer: Option<Arc<dyn MarketSigner>> = match &args.key {
        Some(key) => Some(Arc::new(KeypairSigner::from_secret_hex(key)?)),
        None => None,
    };

    match args.command {
        Commands::List {
            inscription_id,
            price,
            payout,
        } => {
            let market = Marketplace::new(config, chain, assets, signer);
            let psbt = market.create_listing(&inscription_id, price, &payout).await?;
            println!("{psbt}");
        }
        Commands::Validate { order, number } => {
            let market = Marketplace::new(config, chain, assets, signer);
            let order = read_order(&order)?;
            let validated = market.validate_order(&order, number).await?;
            println!(
                "{}",
                serde_json::json!({
                    "inscription_id": validated.inscription_id,
                    "price": validated.price,
                    "asset_output": validated.asset_output.to_string(),
                    "asset_value": validated.asset_value,
                })
            );
        }
        Commands::Buy {
            order,
            receiver,
            payer,
            number,
        } => {
            let market = Marketplace::new(config.clone(), chain, assets, signer.clone());
            let signer = signer.ok_or_else(|| anyhow!("buying requires a signing key"))?;
            let default_address = signer_address(signer.as_ref(), &config).await?;
            let receiver = receiver.unwrap_or_else(|| default_address.clone());
            let payer = payer.unwrap_or_else(|| default_address.clone());

            let order = read_order(&order)?;
            let txid = market.buy(&order, &receiver, &payer, number).await?;
            println!("{txid}");
        }
        Commands::MintDummies { payer, count } => {
            config.dummy_utxos_to_create = count;
            let market = Marketplace::new(config.clone(), chain, assets, signer.clone());
            let signer = signer.ok_or_else(|| anyhow!("minting requires a signing key"))?;
            let payer = match payer {
                Some(address) => address,
                None => signer_address(signer.as_ref(), &config).await?,
            };

            let txid = market.mint_dummy_utxos(&payer).await?;
            println!("{txid}");
        }
        Commands::Utxos { address } => {
            use ordmarket::ChainProvider;
            let utxos = ChainProvider::get_address_utxos(chain.as_ref(), &address).await?;
            println!("{}", serde_json::to_string_pretty(&utxos)?);
        }
    }

    Ok(())
}
