//! Esplora HTTP client
//!
//! Chain-state provider backed by an Esplora-compatible API
//! (blockstream.info, mempool.space). Provides typed methods for the
//! endpoints the engine needs and implements [`ChainProvider`].
//!
//! Transport failures are returned to the caller immediately; the engine
//! never retries a chain lookup, because a retried purchase must restart
//! from UTXO re-selection anyway.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bitcoin::Txid;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

use super::ChainProvider;
use crate::utxo::Utxo;

/// Esplora client configuration
#[derive(Clone, Debug)]
pub struct EsploraConfig {
    /// API URL (e.g., https://mempool.space/api)
    pub url: String,
    /// Connection timeout in seconds
    pub timeout: u64,
}

impl Default for EsploraConfig {
    fn default() -> Self {
        Self {
            url: "https://mempool.space/api".to_string(),
            timeout: 30,
        }
    }
}

/// Esplora transaction status
#[derive(Debug, Deserialize)]
pub struct EsploraTxStatus {
    /// Transaction confirmation status
    pub confirmed: bool,
    /// Block height (if confirmed)
    pub block_height: Option<u64>,
    /// Block hash (if confirmed)
    pub block_hash: Option<String>,
    /// Block time (if confirmed)
    pub block_time: Option<u64>,
}

/// Esplora UTXO
#[derive(Debug, Deserialize)]
pub struct EsploraUtxo {
    /// Transaction ID
    pub txid: String,
    /// Output index
    pub vout: u32,
    /// Output value in satoshis
    pub value: u64,
    /// Output status
    pub status: EsploraTxStatus,
}

impl EsploraUtxo {
    fn into_utxo(self) -> Result<Utxo> {
        Ok(Utxo {
            txid: Txid::from_str(&self.txid).context("Invalid txid in esplora UTXO")?,
            vout: self.vout,
            value: self.value,
            confirmed: self.status.confirmed,
            block_time: self.status.block_time,
            block_height: self.status.block_height,
            inscription_id: None,
        })
    }
}

/// Esplora API client
pub struct EsploraClient {
    /// HTTP client
    client: Client,
    /// Client configuration
    config: EsploraConfig,
}

impl EsploraClient {
    /// Create a new Esplora client
    pub fn new(config: EsploraConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, config }
    }

    /// Create a client for the given API URL with default timeouts
    pub fn from_url(url: &str) -> Self {
        Self::new(EsploraConfig {
            url: url.trim_end_matches('/').to_string(),
            ..EsploraConfig::default()
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.url.trim_end_matches('/'), path)
    }

    /// Make a GET request and parse the JSON response
    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        debug!("Making Esplora API request to {}", path);

        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .context("Failed to send Esplora API request")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Esplora API request failed with status: {}", status));
        }

        response
            .json::<T>()
            .await
            .context("Failed to parse Esplora API response")
    }

    /// Make a GET request and return the plain-text response
    async fn get_text(&self, path: &str) -> Result<String> {
        debug!("Making Esplora API request to {}", path);

        let response = self
            .client
            .get(self.url(path))
            .send()
            .await
            .context("Failed to send Esplora API request")?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("Esplora API request failed with status: {}", status));
        }

        response
            .text()
            .await
            .context("Failed to read Esplora API response")
    }

    /// Get transaction hex
    pub async fn get_transaction_hex(&self, txid: &str) -> Result<String> {
        let hex = self.get_text(&format!("/tx/{}/hex", txid)).await?;
        debug!("Got transaction hex for txid: {}", txid);
        Ok(hex.trim().to_string())
    }

    /// Get address UTXOs
    pub async fn get_address_utxos(&self, address: &str) -> Result<Vec<EsploraUtxo>> {
        let utxos = self
            .get_json::<Vec<EsploraUtxo>>(&format!("/address/{}/utxo", address))
            .await?;
        debug!("Got {} UTXOs for address: {}", utxos.len(), address);
        Ok(utxos)
    }

    /// Get fee estimates (confirmation target -> sat/vB)
    pub async fn get_fee_estimates(&self) -> Result<Value> {
        self.get_json::<Value>("/fee-estimates").await
    }

    /// Broadcast a raw transaction, returning the txid
    pub async fn broadcast_transaction(&self, hex: &str) -> Result<String> {
        debug!("Broadcasting transaction");

        let response = self
            .client
            .post(self.url("/tx"))
            .body(hex.to_string())
            .send()
            .await
            .context("Failed to send Esplora API request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read Esplora API response")?;

        if !status.is_success() {
            // the node's rejection reason comes back in the body verbatim
            return Err(anyhow!("{}", body.trim()));
        }

        let txid = body.trim().to_string();
        debug!("Transaction broadcast with ID: {}", txid);
        Ok(txid)
    }
}

#[async_trait]
impl ChainProvider for EsploraClient {
    async fn get_address_utxos(&self, address: &str) -> Result<Vec<Utxo>> {
        let utxos = EsploraClient::get_address_utxos(self, address).await?;
        utxos.into_iter().map(EsploraUtxo::into_utxo).collect()
    }

    async fn get_tx_hex(&self, txid: &Txid) -> Result<String> {
        self.get_transaction_hex(&txid.to_string()).await
    }

    async fn recommended_fee_rate(&self) -> Result<u64> {
        let estimates = self.get_fee_estimates().await?;
        let rate = estimates
            .get("1")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| anyhow!("No next-block fee estimate available"))?;
        Ok((rate.ceil() as u64).max(1))
    }

    async fn broadcast(&self, raw_tx_hex: &str) -> Result<String> {
        self.broadcast_transaction(raw_tx_hex).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::mock;

    fn test_client() -> EsploraClient {
        EsploraClient::from_url(&mockito::server_url())
    }

    #[tokio::test]
    async fn test_get_address_utxos() {
        let _m = mock("GET", "/address/bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4/utxo")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[
                {
                    "txid": "0000000000000000000000000000000000000000000000000000000000000001",
                    "vout": 0,
                    "value": 1000000,
                    "status": {
                        "confirmed": true,
                        "block_height": 123456,
                        "block_hash": "0000000000000000000000000000000000000000000000000000000000000000",
                        "block_time": 1600000000
                    }
                }
            ]"#,
            )
            .create();

        let client = test_client();
        let utxos = ChainProvider::get_address_utxos(
            &client,
            "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4",
        )
        .await
        .unwrap();

        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].value, 1_000_000);
        assert!(utxos[0].confirmed);
        assert_eq!(utxos[0].block_height, Some(123_456));
    }

    #[tokio::test]
    async fn test_recommended_fee_rate_rounds_up() {
        let _m = mock("GET", "/fee-estimates")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"1": 12.3, "6": 8.1}"#)
            .create();

        let rate = test_client().recommended_fee_rate().await.unwrap();
        assert_eq!(rate, 13);
    }

    #[tokio::test]
    async fn test_broadcast_rejection_surfaces_reason() {
        let _m = mock("POST", "/tx")
            .with_status(400)
            .with_body("sendrawtransaction RPC error: bad-txns-inputs-missingorspent")
            .create();

        let err = test_client().broadcast("deadbeef").await.unwrap_err();
        assert!(err
            .to_string()
            .contains("bad-txns-inputs-missingorspent"));
    }

    #[tokio::test]
    async fn test_error_status_propagates() {
        let _m = mock("GET", "/fee-estimates").with_status(500).create();

        let result = test_client().get_fee_estimates().await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("status: 500"));
    }
}
