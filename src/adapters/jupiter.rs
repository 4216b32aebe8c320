// Swap construction and pricing through the Jupiter aggregator HTTP API

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::chain::constants::{
    priority_fee_lamports, sol_to_lamports, to_base_units, JUPITER_PRICE_URL, JUPITER_QUOTE_URL,
    JUPITER_SWAP_URL, SWAP_COMPUTE_UNITS, WSOL_MINT,
};
use crate::chain::{IntentKind, RpcPool, SwapBuilder, TradeIntent, UnsignedTransaction};
use crate::error::ExecutionError;
use crate::strategy::MarketData;
use crate::utils::RetryPolicy;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    swap_transaction: String,
}

/// Builds SOL <-> token swaps. Entries spend SOL, exits sell token units.
pub struct JupiterSwapBuilder {
    http: reqwest::Client,
    pool: Arc<RpcPool>,
    retry: RetryPolicy,
    decimals: DashMap<String, u8>,
    /// When set, the fee is paid as a relay tip of at least this many
    /// lamports instead of a CU price
    relay_tip_floor: Option<u64>,
}

impl JupiterSwapBuilder {
    pub fn new(pool: Arc<RpcPool>, relay_tip_floor: Option<u64>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            pool,
            retry: RetryPolicy::default(),
            decimals: DashMap::new(),
            relay_tip_floor,
        })
    }

    async fn token_decimals(&self, mint: &str) -> Result<u8, ExecutionError> {
        if let Some(decimals) = self.decimals.get(mint) {
            return Ok(*decimals);
        }
        let decimals = self
            .pool
            .call("getTokenSupply", |client| {
                let mint = mint.to_string();
                async move { client.token_decimals(&mint).await }
            })
            .await?;
        self.decimals.insert(mint.to_string(), decimals);
        Ok(decimals)
    }

    async fn quote(&self, input: &str, output: &str, amount: u64, slippage_bps: u64) -> Result<Value> {
        let amount = amount.to_string();
        let slippage = slippage_bps.to_string();
        self.retry
            .retry_async(|| async {
                let response = self
                    .http
                    .get(JUPITER_QUOTE_URL)
                    .query(&[
                        ("inputMint", input),
                        ("outputMint", output),
                        ("amount", amount.as_str()),
                        ("slippageBps", slippage.as_str()),
                    ])
                    .send()
                    .await
                    .context("Jupiter quote request failed")?
                    .error_for_status()
                    .context("Jupiter quote rejected")?;
                response
                    .json::<Value>()
                    .await
                    .context("Jupiter quote parse failed")
            })
            .await
    }

    async fn swap(&self, body: &Value) -> Result<Vec<u8>> {
        let response: SwapResponse = self
            .retry
            .retry_async(|| async {
                self.http
                    .post(JUPITER_SWAP_URL)
                    .json(body)
                    .send()
                    .await
                    .context("Jupiter swap request failed")?
                    .error_for_status()
                    .context("Jupiter swap rejected")?
                    .json::<SwapResponse>()
                    .await
                    .context("Jupiter swap parse failed")
            })
            .await?;
        BASE64
            .decode(response.swap_transaction)
            .context("Jupiter swap transaction is not base64")
    }
}

#[async_trait]
impl SwapBuilder for JupiterSwapBuilder {
    async fn build(
        &self,
        intent: &TradeIntent,
        priority_fee: u64,
        payer: &str,
    ) -> Result<UnsignedTransaction, ExecutionError> {
        let wsol = WSOL_MINT.to_string();
        let (input, output, amount) = match intent.kind {
            IntentKind::Entry => (wsol.clone(), intent.token_id.clone(), sol_to_lamports(intent.amount)),
            IntentKind::Exit => {
                let decimals = self.token_decimals(&intent.token_id).await?;
                (
                    intent.token_id.clone(),
                    wsol.clone(),
                    to_base_units(intent.amount, decimals),
                )
            }
        };

        let build_error = |e: anyhow::Error| ExecutionError::Build {
            token_id: intent.token_id.clone(),
            reason: format!("{:#}", e),
        };

        if amount == 0 {
            return Err(build_error(anyhow!("amount rounds to zero base units")));
        }

        let quote = self
            .quote(&input, &output, amount, intent.slippage_bps)
            .await
            .map_err(build_error)?;
        let body = swap_body(quote, payer, priority_fee, self.relay_tip_floor);
        let payload = self.swap(&body).await.map_err(build_error)?;

        debug!(
            token = %intent.token_id,
            kind = %intent.kind,
            amount,
            priority_fee,
            bytes = payload.len(),
            "Built swap transaction"
        );

        Ok(UnsignedTransaction {
            token_id: intent.token_id.clone(),
            payload,
            priority_fee,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PriceResponse {
    data: std::collections::HashMap<String, Option<PriceEntry>>,
}

#[derive(Debug, Deserialize)]
struct PriceEntry {
    price: String,
}

/// Token price in SOL from the Jupiter price API. Has no liquidity data.
pub struct JupiterPriceFeed {
    http: reqwest::Client,
}

impl JupiterPriceFeed {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http })
    }
}

fn parse_price(body: PriceResponse, token_id: &str) -> Result<f64> {
    let entry = body
        .data
        .get(token_id)
        .and_then(|e| e.as_ref())
        .ok_or_else(|| anyhow!("no Jupiter price for {}", token_id))?;
    entry
        .price
        .parse::<f64>()
        .context("Jupiter price is not a number")
}

#[async_trait]
impl MarketData for JupiterPriceFeed {
    fn source(&self) -> String {
        "jupiter".to_string()
    }

    async fn price(&self, token_id: &str) -> Result<f64> {
        let vs_token = WSOL_MINT.to_string();
        let body: PriceResponse = self
            .http
            .get(JUPITER_PRICE_URL)
            .query(&[("ids", token_id), ("vsToken", vs_token.as_str())])
            .send()
            .await
            .context("Jupiter price request failed")?
            .error_for_status()?
            .json()
            .await
            .context("Jupiter price parse failed")?;
        parse_price(body, token_id)
    }

    async fn liquidity(&self, _token_id: &str) -> Result<f64> {
        Err(anyhow!("jupiter price feed has no liquidity data"))
    }
}

/// `priority_fee` is micro-lamports per CU. With a relay tip floor the fee is
/// paid as a tip carrying the same total over an estimated swap budget.
fn swap_body(quote: Value, payer: &str, priority_fee: u64, relay_tip_floor: Option<u64>) -> Value {
    match relay_tip_floor {
        Some(floor) => {
            let tip = priority_fee_lamports(priority_fee, SWAP_COMPUTE_UNITS).max(floor);
            json!({
                "quoteResponse": quote,
                "userPublicKey": payer,
                "wrapAndUnwrapSol": true,
                "dynamicComputeUnitLimit": true,
                "prioritizationFeeLamports": { "jitoTipLamports": tip },
            })
        }
        None => json!({
            "quoteResponse": quote,
            "userPublicKey": payer,
            "wrapAndUnwrapSol": true,
            "dynamicComputeUnitLimit": true,
            "computeUnitPriceMicroLamports": priority_fee,
        }),
    }
}
