//! Marketplace facade
//!
//! [`Marketplace`] wires the collaborators together and exposes the
//! end-to-end flows: list an inscription for sale, validate an incoming
//! order, and buy one (including the dummy-minting sub-flow when the
//! payer has no glue UTXO on hand).

use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use bitcoin::{Address, XOnlyPublicKey};
use log::{info, warn};

use crate::assembler::{self, AssetOutput};
use crate::config::MarketConfig;
use crate::dummy::{find_dummy, purchase_requirements};
use crate::error::{MarketError, Result};
use crate::order::{self, Order, ValidatedOrder};
use crate::rpc::{AssetIndex, ChainProvider};
use crate::signing::{self, MarketSigner};
use crate::utxo::{select_payment_utxos, sort_largest_first, DummyUtxo, PaymentSelection, Utxo};

/// Everything gathered ahead of assembling a purchase: the payer's UTXO
/// set, the chosen dummy (if any), the payment selection and the fee
/// rate the selection was made against.
#[derive(Clone, Debug)]
pub struct PurchaseContext {
    pub payer_utxos: Vec<Utxo>,
    pub dummy: Option<DummyUtxo>,
    pub selection: PaymentSelection,
    pub fee_rate: u64,
}

pub struct Marketplace {
    config: MarketConfig,
    chain: Arc<dyn ChainProvider>,
    assets: Arc<dyn AssetIndex>,
    signer: Option<Arc<dyn MarketSigner>>,
}

impl Marketplace {
    pub fn new(
        config: MarketConfig,
        chain: Arc<dyn ChainProvider>,
        assets: Arc<dyn AssetIndex>,
        signer: Option<Arc<dyn MarketSigner>>,
    ) -> Self {
        Self {
            config,
            chain,
            assets,
            signer,
        }
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    fn signer(&self) -> Result<&Arc<dyn MarketSigner>> {
        self.signer.as_ref().ok_or(MarketError::SignerUnavailable)
    }

    fn parse_address(&self, address: &str) -> Result<Address> {
        Address::from_str(address)
            .map_err(|err| MarketError::Provider(anyhow!("invalid address {address}: {err}")))?
            .require_network(self.config.network)
            .map_err(|err| MarketError::Provider(anyhow!("address {address}: {err}")))
    }

    async fn buyer_key(&self) -> Result<XOnlyPublicKey> {
        let hex = self.signer()?.public_key().await?;
        XOnlyPublicKey::from_str(hex.trim())
            .map_err(|err| MarketError::Provider(anyhow!("signer returned invalid key: {err}")))
    }

    /// The fee rate to use, falling back to the configured default when
    /// the provider is unavailable.
    pub async fn fee_rate(&self) -> u64 {
        match self.chain.recommended_fee_rate().await {
            Ok(rate) => rate,
            Err(err) => {
                warn!(
                    "fee-rate provider unavailable ({err:#}), using default {} sat/vB",
                    self.config.default_fee_rate
                );
                self.config.default_fee_rate
            }
        }
    }

    /// Validate an order against current chain state.
    pub async fn validate_order(
        &self,
        order: &Order,
        expected_number: Option<i64>,
    ) -> Result<ValidatedOrder> {
        order::validate_order(self.assets.as_ref(), order, expected_number).await
    }

    /// Build and sign a listing PSBT for an inscription the signer owns,
    /// returning it base64-encoded for publication.
    pub async fn create_listing(
        &self,
        inscription_id: &str,
        price: u64,
        payout_address: &str,
    ) -> Result<String> {
        let inscription = self
            .assets
            .inscription_by_id(inscription_id)
            .await
            .map_err(|_| MarketError::AssetNotFound {
                id: inscription_id.to_string(),
            })?;
        let payout = self.parse_address(payout_address)?;
        let seller_key = self.buyer_key().await?;

        let asset = AssetOutput {
            outpoint: inscription.output,
            value: inscription.value,
        };
        let mut psbt = assembler::build_listing_psbt(&asset, price, &payout, &seller_key)?;
        signing::sign_psbt(&mut psbt, self.signer()?.as_ref()).await?;

        info!("created listing for {inscription_id} at {price} sat");
        Ok(psbt.to_string())
    }

    /// Gather the payer's UTXOs, pick a dummy, and select payment UTXOs
    /// for a purchase at `price` (or, when no dummy exists, for the
    /// dummy-minting sub-flow).
    pub async fn prepare_purchase(
        &self,
        payer_address: &str,
        price: u64,
    ) -> Result<PurchaseContext> {
        let payer_utxos = self.chain.get_address_utxos(payer_address).await?;
        let dummy = find_dummy(
            self.assets.as_ref(),
            &payer_utxos,
            self.config.dummy_utxo_value,
        )
        .await?;

        let mut candidates: Vec<Utxo> = match &dummy {
            Some(dummy) => payer_utxos
                .iter()
                .filter(|utxo| utxo.outpoint() != dummy.outpoint())
                .cloned()
                .collect(),
            None => payer_utxos.clone(),
        };
        sort_largest_first(&mut candidates);

        let fee_rate = self.fee_rate().await;
        let (min_value, extra_inputs, extra_outputs) =
            purchase_requirements(dummy.as_ref(), price, &self.config);
        let selection =
            select_payment_utxos(&candidates, min_value, extra_inputs, extra_outputs, fee_rate)?;

        Ok(PurchaseContext {
            payer_utxos,
            dummy,
            selection,
            fee_rate,
        })
    }

    /// Mint fresh dummy UTXOs to the payer's address, returning the
    /// broadcast txid.
    pub async fn mint_dummy_utxos(&self, payer_address: &str) -> Result<String> {
        let payer = self.parse_address(payer_address)?;
        let buyer_key = self.buyer_key().await?;

        let mut candidates = self.chain.get_address_utxos(payer_address).await?;
        sort_largest_first(&mut candidates);

        let fee_rate = self.fee_rate().await;
        let (min_value, extra_inputs, extra_outputs) =
            purchase_requirements(None, 0, &self.config);
        let selection =
            select_payment_utxos(&candidates, min_value, extra_inputs, extra_outputs, fee_rate)?;

        let psbt =
            assembler::build_dummy_mint_psbt(&selection, &payer, &buyer_key, fee_rate, &self.config)?;
        let txid =
            signing::sign_finalize_broadcast(psbt, self.signer()?.as_ref(), self.chain.as_ref())
                .await?;
        info!(
            "minted {} dummy UTXOs in {txid}",
            self.config.dummy_utxos_to_create
        );
        Ok(txid)
    }

    /// Buy the asset an order offers: validate, prepare, assemble, sign
    /// and broadcast. When the payer has no dummy UTXO, the minting
    /// sub-flow runs first and the purchase is re-prepared against the
    /// refreshed UTXO set.
    ///
    /// The asset lands on `receiver_address`; payments, the replacement
    /// dummy and change come from and return to `payer_address`.
    pub async fn buy(
        &self,
        order: &Order,
        receiver_address: &str,
        payer_address: &str,
        expected_number: Option<i64>,
    ) -> Result<String> {
        let validated = self.validate_order(order, expected_number).await?;

        let mut context = self.prepare_purchase(payer_address, validated.price).await?;
        if context.dummy.is_none() {
            info!("no dummy UTXO on hand, running the minting sub-flow first");
            self.mint_dummy_utxos(payer_address).await?;
            context = self.prepare_purchase(payer_address, validated.price).await?;
        }
        let dummy = context.dummy.ok_or_else(|| {
            MarketError::Provider(anyhow!("no dummy UTXO available after minting"))
        })?;

        let receiver = self.parse_address(receiver_address)?;
        let payer = self.parse_address(payer_address)?;
        let buyer_key = self.buyer_key().await?;

        let psbt = assembler::build_purchase_psbt(
            self.chain.as_ref(),
            &validated,
            &dummy,
            &context.selection,
            &receiver,
            &payer,
            &buyer_key,
            context.fee_rate,
            &self.config,
        )
        .await?;

        let txid =
            signing::sign_finalize_broadcast(psbt, self.signer()?.as_ref(), self.chain.as_ref())
                .await?;
        info!("purchased {} in {txid}", validated.inscription_id);
        Ok(txid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::tests::{funding_tx, payer_address, signed_seller_psbt};
    use crate::rpc::InscriptionData;
    use crate::signing::KeypairSigner;
    use anyhow::Result as AnyResult;
    use async_trait::async_trait;
    use bitcoin::{OutPoint, ScriptBuf, Transaction, Txid};
    use std::collections::HashMap;
    use std::sync::Mutex;

    const SECRET: &str = "0000000000000000000000000000000000000000000000000000000000000001";

    /// Stateful chain fake: broadcasting a transaction spends its inputs
    /// and credits its payer-scripted outputs, like a mempool-aware
    /// explorer would.
    struct FakeChain {
        tracked_script: ScriptBuf,
        utxos: Mutex<HashMap<OutPoint, Utxo>>,
        tx_hex: Mutex<HashMap<Txid, String>>,
        broadcasts: Mutex<Vec<Transaction>>,
    }

    impl FakeChain {
        fn new(tracked_script: ScriptBuf, txs: &[&Transaction], utxos: Vec<Utxo>) -> Self {
            Self {
                tracked_script,
                utxos: Mutex::new(utxos.into_iter().map(|u| (u.outpoint(), u)).collect()),
                tx_hex: Mutex::new(
                    txs.iter()
                        .map(|tx| {
                            (
                                tx.compute_txid(),
                                hex::encode(bitcoin::consensus::encode::serialize(*tx)),
                            )
                        })
                        .collect(),
                ),
                broadcasts: Mutex::new(Vec::new()),
            }
        }

        fn broadcast_count(&self) -> usize {
            self.broadcasts.lock().unwrap().len()
        }

        fn broadcast_at(&self, index: usize) -> Transaction {
            self.broadcasts.lock().unwrap()[index].clone()
        }
    }

    #[async_trait]
    impl ChainProvider for FakeChain {
        async fn get_address_utxos(&self, _address: &str) -> AnyResult<Vec<Utxo>> {
            Ok(self.utxos.lock().unwrap().values().cloned().collect())
        }

        async fn get_tx_hex(&self, txid: &Txid) -> AnyResult<String> {
            self.tx_hex
                .lock()
                .unwrap()
                .get(txid)
                .cloned()
                .ok_or_else(|| anyhow!("unknown tx {txid}"))
        }

        async fn recommended_fee_rate(&self) -> AnyResult<u64> {
            Ok(5)
        }

        async fn broadcast(&self, raw_tx_hex: &str) -> AnyResult<String> {
            let tx: Transaction = bitcoin::consensus::deserialize(&hex::decode(raw_tx_hex)?)?;
            let txid = tx.compute_txid();

            let mut utxos = self.utxos.lock().unwrap();
            for input in &tx.input {
                utxos.remove(&input.previous_output);
            }
            for (vout, output) in tx.output.iter().enumerate() {
                if output.script_pubkey == self.tracked_script {
                    let utxo = Utxo {
                        txid,
                        vout: vout as u32,
                        value: output.value.to_sat(),
                        confirmed: false,
                        block_time: None,
                        block_height: None,
                        inscription_id: None,
                    };
                    utxos.insert(utxo.outpoint(), utxo);
                }
            }

            self.tx_hex
                .lock()
                .unwrap()
                .insert(txid, raw_tx_hex.to_string());
            self.broadcasts.lock().unwrap().push(tx);
            Ok(txid.to_string())
        }
    }

    /// Chain fake whose fee-rate endpoint is down.
    struct FeeRateDownChain;

    #[async_trait]
    impl ChainProvider for FeeRateDownChain {
        async fn get_address_utxos(&self, _address: &str) -> AnyResult<Vec<Utxo>> {
            Ok(vec![])
        }

        async fn get_tx_hex(&self, _txid: &Txid) -> AnyResult<String> {
            Err(anyhow!("provider down"))
        }

        async fn recommended_fee_rate(&self) -> AnyResult<u64> {
            Err(anyhow!("fee estimates unavailable"))
        }

        async fn broadcast(&self, _raw_tx_hex: &str) -> AnyResult<String> {
            Err(anyhow!("provider down"))
        }
    }

    struct FakeIndex {
        inscription_id: String,
        inscription: InscriptionData,
    }

    #[async_trait]
    impl AssetIndex for FakeIndex {
        async fn inscription_by_id(&self, id: &str) -> AnyResult<InscriptionData> {
            if id == self.inscription_id {
                Ok(self.inscription.clone())
            } else {
                Err(anyhow!("inscription {id} not found"))
            }
        }

        async fn utxo_contains_inscription(&self, outpoint: &OutPoint) -> AnyResult<bool> {
            Ok(*outpoint == self.inscription.output)
        }
    }

    fn sale_order(inscription_id: &str, seller_psbt_base64: String) -> Order {
        Order {
            tags: vec![
                vec!["s".to_string(), "10000".to_string()],
                vec!["i".to_string(), inscription_id.to_string()],
            ],
            content: seller_psbt_base64,
            created_at: 1_700_000_000,
        }
    }

    fn marketplace(chain: Arc<FakeChain>, assets: Arc<FakeIndex>) -> Marketplace {
        Marketplace::new(
            MarketConfig::default(),
            chain,
            assets,
            Some(Arc::new(KeypairSigner::from_secret_hex(SECRET).unwrap())),
        )
    }

    fn setup_order(asset_value: u64, price: u64) -> (Order, Arc<FakeIndex>) {
        let (_, asset_utxos) = funding_tx(&[asset_value]);
        let asset_outpoint = asset_utxos[0].outpoint();
        let inscription_id = format!("{}i0", asset_outpoint.txid);
        let seller_psbt = signed_seller_psbt(asset_outpoint, asset_value, price);
        let order = sale_order(&inscription_id, seller_psbt.to_string());
        let index = Arc::new(FakeIndex {
            inscription_id,
            inscription: InscriptionData {
                number: 294,
                output: asset_outpoint,
                value: asset_value,
            },
        });
        (order, index)
    }

    #[tokio::test]
    async fn test_fee_rate_falls_back_to_configured_default() {
        let (_, index) = setup_order(10_000, 10_000);
        let market = Marketplace::new(
            MarketConfig::default(),
            Arc::new(FeeRateDownChain),
            index,
            None,
        );

        assert_eq!(market.fee_rate().await, 7);
    }

    #[tokio::test]
    async fn test_buy_with_dummy_on_hand() {
        let payer = payer_address();
        let (order, index) = setup_order(10_000, 10_000);
        let (wallet_tx, wallet_utxos) = funding_tx(&[600, 50_000]);
        let chain = Arc::new(FakeChain::new(
            payer.script_pubkey(),
            &[&wallet_tx],
            wallet_utxos,
        ));
        let market = marketplace(chain.clone(), index);

        let txid = market
            .buy(&order, &payer.to_string(), &payer.to_string(), Some(294))
            .await
            .unwrap();

        assert_eq!(chain.broadcast_count(), 1);
        let tx = chain.broadcast_at(0);
        assert_eq!(txid, tx.compute_txid().to_string());

        // dummy in, seller pair at position 1/1, payment, fresh dummy, change
        assert_eq!(tx.input.len(), 3);
        assert_eq!(tx.output.len(), 4);
        assert_eq!(tx.output[0].value.to_sat(), 600 + 10_000);
        assert_eq!(tx.output[2].value.to_sat(), 600);
        assert_eq!(tx.output[3].value.to_sat(), 37_900);

        // every input made it to a final witness
        assert!(tx.input.iter().all(|input| input.witness.len() == 1));
    }

    #[tokio::test]
    async fn test_buy_replenishes_the_dummy_pool() {
        let payer = payer_address();
        let (order, index) = setup_order(10_000, 10_000);
        let (wallet_tx, wallet_utxos) = funding_tx(&[600, 50_000]);
        let chain = Arc::new(FakeChain::new(
            payer.script_pubkey(),
            &[&wallet_tx],
            wallet_utxos,
        ));
        let market = marketplace(chain.clone(), index);

        let dummies_before = chain
            .get_address_utxos("")
            .await
            .unwrap()
            .iter()
            .filter(|u| u.value <= 600)
            .count();

        market
            .buy(&order, &payer.to_string(), &payer.to_string(), None)
            .await
            .unwrap();

        let dummies_after = chain
            .get_address_utxos("")
            .await
            .unwrap()
            .iter()
            .filter(|u| u.value <= 600)
            .count();
        assert_eq!(dummies_after, dummies_before);
    }

    #[tokio::test]
    async fn test_buy_runs_minting_sub_flow_when_no_dummy() {
        let payer = payer_address();
        let (order, index) = setup_order(10_000, 10_000);
        // no UTXO at or below the dummy threshold
        let (wallet_tx, wallet_utxos) = funding_tx(&[50_000]);
        let chain = Arc::new(FakeChain::new(
            payer.script_pubkey(),
            &[&wallet_tx],
            wallet_utxos,
        ));
        let market = marketplace(chain.clone(), index);

        market
            .buy(&order, &payer.to_string(), &payer.to_string(), None)
            .await
            .unwrap();

        // first the mint, then the purchase
        assert_eq!(chain.broadcast_count(), 2);
        let mint = chain.broadcast_at(0);
        assert!(mint.output.iter().any(|o| o.value.to_sat() == 600));
        let purchase = chain.broadcast_at(1);
        assert_eq!(purchase.input.len(), 3);
        assert_eq!(purchase.output.len(), 4);
    }

    #[tokio::test]
    async fn test_buy_requires_a_signer() {
        let payer = payer_address();
        let (order, index) = setup_order(10_000, 10_000);
        let (wallet_tx, wallet_utxos) = funding_tx(&[600, 50_000]);
        let chain = Arc::new(FakeChain::new(
            payer.script_pubkey(),
            &[&wallet_tx],
            wallet_utxos,
        ));
        let market = Marketplace::new(MarketConfig::default(), chain, index, None);

        let err = market
            .buy(&order, &payer.to_string(), &payer.to_string(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::SignerUnavailable));
    }

    #[tokio::test]
    async fn test_buy_rejects_wrong_inscription_number() {
        let payer = payer_address();
        let (order, index) = setup_order(10_000, 10_000);
        let (wallet_tx, wallet_utxos) = funding_tx(&[600, 50_000]);
        let chain = Arc::new(FakeChain::new(
            payer.script_pubkey(),
            &[&wallet_tx],
            wallet_utxos,
        ));
        let market = marketplace(chain.clone(), index);

        let err = market
            .buy(&order, &payer.to_string(), &payer.to_string(), Some(295))
            .await
            .unwrap_err();
        assert!(matches!(err, MarketError::AssetNotFound { .. }));
        assert_eq!(chain.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn test_create_listing_returns_signed_psbt() {
        let payer = payer_address();
        let (_, index) = setup_order(10_000, 10_000);
        let inscription_id = index.inscription_id.clone();
        let chain = Arc::new(FakeChain::new(payer.script_pubkey(), &[], vec![]));
        let market = marketplace(chain, index);

        let encoded = market
            .create_listing(&inscription_id, 25_000, &payer.to_string())
            .await
            .unwrap();

        let psbt = bitcoin::Psbt::from_str(&encoded).unwrap();
        assert_eq!(psbt.unsigned_tx.output[0].value.to_sat(), 25_000);
        assert!(psbt.inputs[0].tap_key_sig.is_some());
        assert_eq!(
            psbt.inputs[0].tap_key_sig.unwrap().sighash_type,
            bitcoin::sighash::TapSighashType::SinglePlusAnyoneCanPay
        );
    }

    #[tokio::test]
    async fn test_prepare_purchase_excludes_the_dummy_from_payments() {
        let payer = payer_address();
        let (_, index) = setup_order(10_000, 10_000);
        let (wallet_tx, wallet_utxos) = funding_tx(&[600, 50_000]);
        let chain = Arc::new(FakeChain::new(
            payer.script_pubkey(),
            &[&wallet_tx],
            wallet_utxos,
        ));
        let market = marketplace(chain, index);

        let context = market
            .prepare_purchase(&payer.to_string(), 10_000)
            .await
            .unwrap();

        let dummy = context.dummy.unwrap();
        assert_eq!(dummy.value(), 600);
        assert!(context
            .selection
            .utxos
            .iter()
            .all(|utxo| utxo.outpoint() != dummy.outpoint()));
    }
}
