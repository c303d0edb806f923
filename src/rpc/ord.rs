//! Ordinals explorer HTTP client
//!
//! Asset-index provider backed by an ord explorer's JSON API
//! (`/inscription/:id` and `/output/:outpoint` with
//! `Accept: application/json`). Implements [`AssetIndex`].

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bitcoin::{OutPoint, Txid};
use log::debug;
use reqwest::{header, Client};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use super::{AssetIndex, InscriptionData};

/// Ord explorer client configuration
#[derive(Clone, Debug)]
pub struct OrdConfig {
    /// Explorer URL (e.g., https://ordinals.com)
    pub url: String,
    /// Connection timeout in seconds
    pub timeout: u64,
}

impl Default for OrdConfig {
    fn default() -> Self {
        Self {
            url: "https://ordinals.com".to_string(),
            timeout: 30,
        }
    }
}

/// `/inscription/:id` response (the fields the engine reads)
#[derive(Debug, Deserialize)]
struct OrdInscription {
    number: i64,
    satpoint: String,
    value: Option<u64>,
}

/// `/output/:outpoint` response (the fields the engine reads)
#[derive(Debug, Deserialize)]
struct OrdOutput {
    inscriptions: Vec<String>,
}

/// Ord explorer API client
pub struct OrdClient {
    /// HTTP client
    client: Client,
    /// Client configuration
    config: OrdConfig,
}

impl OrdClient {
    /// Create a new ord explorer client
    pub fn new(config: OrdConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    /// Create a client for the given explorer URL with default timeouts
    pub fn from_url(url: &str) -> Self {
        Self::new(OrdConfig {
            url: url.trim_end_matches('/').to_string(),
            ..OrdConfig::default()
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        debug!("Making ord explorer request to {}", path);

        let url = format!("{}{}", self.config.url.trim_end_matches('/'), path);
        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .context("Failed to send ord explorer request")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!(
                "ord explorer request failed with status: {}",
                status
            ));
        }

        response
            .json::<T>()
            .await
            .context("Failed to parse ord explorer response")
    }
}

/// Parse the outpoint out of a satpoint string ("txid:vout:offset").
fn satpoint_outpoint(satpoint: &str) -> Result<OutPoint> {
    let mut parts = satpoint.split(':');
    let txid = parts
        .next()
        .ok_or_else(|| anyhow!("empty satpoint"))
        .and_then(|s| Txid::from_str(s).context("invalid txid in satpoint"))?;
    let vout = parts
        .next()
        .ok_or_else(|| anyhow!("satpoint missing vout: {satpoint}"))?
        .parse::<u32>()
        .context("invalid vout in satpoint")?;
    Ok(OutPoint::new(txid, vout))
}

#[async_trait]
impl AssetIndex for OrdClient {
    async fn inscription_by_id(&self, inscription_id: &str) -> Result<InscriptionData> {
        let inscription = self
            .get_json::<OrdInscription>(&format!("/inscription/{}", inscription_id))
            .await?;

        let output = satpoint_outpoint(&inscription.satpoint)?;
        let value = inscription
            .value
            .ok_or_else(|| anyhow!("inscription {} has no output value", inscription_id))?;

        debug!(
            "Resolved inscription {} -> number {}, output {}",
            inscription_id, inscription.number, output
        );

        Ok(InscriptionData {
            number: inscription.number,
            output,
            value,
        })
    }

    async fn utxo_contains_inscription(&self, outpoint: &OutPoint) -> Result<bool> {
        let output = self
            .get_json::<OrdOutput>(&format!("/output/{}", outpoint))
            .await?;
        Ok(!output.inscriptions.is_empty())
    }
}
