// DexScreener market data and new-token detector

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use moka::future::Cache;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chain::constants::{DEXSCREENER_PROFILES_URL, DEXSCREENER_TOKENS_URL, WSOL_MINT};
use crate::strategy::{MarketData, SocialFlags, TokenSnapshot};
use crate::utils::RetryPolicy;

const CHAIN_ID: &str = "solana";
const PAIR_CACHE_TTL: Duration = Duration::from_secs(2);
const SEEN_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);
const SEEN_TOKEN_CAPACITY: u64 = 50_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DexPair {
    pub chain_id: String,
    pub pair_address: String,
    pub base_token: PairToken,
    pub quote_token: PairToken,
    /// Price in quote-token units
    pub price_native: String,
    pub liquidity: Option<PairLiquidity>,
    pub volume: Option<PairVolume>,
    pub price_change: Option<PairPriceChange>,
    pub pair_created_at: Option<i64>,
    pub info: Option<PairInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairToken {
    pub address: String,
    pub name: String,
    pub symbol: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairLiquidity {
    pub usd: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairVolume {
    pub h24: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairPriceChange {
    pub m5: Option<f64>,
    pub h1: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PairInfo {
    #[serde(default)]
    pub websites: Vec<PairLink>,
    #[serde(default)]
    pub socials: Vec<PairSocial>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairLink {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairSocial {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct TokensResponse {
    pairs: Option<Vec<DexPair>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenProfile {
    chain_id: String,
    token_address: String,
}

impl DexPair {
    fn liquidity_usd(&self) -> f64 {
        self.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0)
    }

    fn is_sol_quoted(&self) -> bool {
        self.quote_token.address == WSOL_MINT.to_string() || self.quote_token.symbol == "SOL"
    }

    pub fn social_flags(&self) -> SocialFlags {
        let info = self.info.clone().unwrap_or_default();
        SocialFlags {
            website: !info.websites.is_empty(),
            twitter: info.socials.iter().any(|s| s.kind == "twitter"),
            telegram: info.socials.iter().any(|s| s.kind == "telegram"),
        }
    }

    pub fn to_snapshot(&self) -> Result<TokenSnapshot> {
        let price = self
            .price_native
            .parse::<f64>()
            .context("priceNative is not a number")?;
        let age = self
            .pair_created_at
            .map(|created_ms| {
                let elapsed = Utc::now().timestamp_millis().saturating_sub(created_ms).max(0);
                Duration::from_millis(elapsed as u64)
            })
            .unwrap_or_default();

        Ok(TokenSnapshot {
            token_id: self.base_token.address.clone(),
            symbol: self.base_token.symbol.clone(),
            name: self.base_token.name.clone(),
            liquidity_usd: self.liquidity_usd(),
            volume_24h_usd: self.volume.as_ref().and_then(|v| v.h24).unwrap_or(0.0),
            price,
            age,
            price_change_5m_pct: self.price_change.as_ref().and_then(|c| c.m5),
            price_change_1h_pct: self.price_change.as_ref().and_then(|c| c.h1),
            social: self.social_flags(),
        })
    }
}

/// Deepest SOL-quoted Solana pair whose base token is `token_id`
pub fn best_pair(pairs: Vec<DexPair>, token_id: &str) -> Option<DexPair> {
    pairs
        .into_iter()
        .filter(|p| p.chain_id == CHAIN_ID && p.base_token.address == token_id && p.is_sol_quoted())
        .max_by(|a, b| a.liquidity_usd().total_cmp(&b.liquidity_usd()))
}

pub struct DexScreenerMarket {
    http: reqwest::Client,
    retry: RetryPolicy,
    pairs: Cache<String, Arc<DexPair>>,
}

impl DexScreenerMarket {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            retry: RetryPolicy::new(2),
            pairs: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(PAIR_CACHE_TTL)
                .build(),
        })
    }

    pub async fn pair(&self, token_id: &str) -> Result<Arc<DexPair>> {
        if let Some(pair) = self.pairs.get(token_id).await {
            return Ok(pair);
        }

        let url = format!("{}/{}", DEXSCREENER_TOKENS_URL, token_id);
        let response: TokensResponse = self
            .retry
            .retry_async(|| async {
                self.http
                    .get(&url)
                    .send()
                    .await
                    .context("DexScreener request failed")?
                    .error_for_status()
                    .context("DexScreener rejected request")?
                    .json::<TokensResponse>()
                    .await
                    .context("DexScreener response parse failed")
            })
            .await?;

        let pair = best_pair(response.pairs.unwrap_or_default(), token_id)
            .map(Arc::new)
            .ok_or_else(|| anyhow!("no SOL pair on DexScreener for {}", token_id))?;
        self.pairs.insert(token_id.to_string(), Arc::clone(&pair)).await;
        Ok(pair)
    }

    pub async fn snapshot(&self, token_id: &str) -> Result<TokenSnapshot> {
        self.pair(token_id).await?.to_snapshot()
    }

    async fn latest_profiles(&self) -> Result<Vec<String>> {
        let profiles: Vec<TokenProfile> = self
            .http
            .get(DEXSCREENER_PROFILES_URL)
            .send()
            .await
            .context("DexScreener profiles request failed")?
            .error_for_status()?
            .json()
            .await
            .context("DexScreener profiles parse failed")?;
        Ok(profiles
            .into_iter()
            .filter(|p| p.chain_id == CHAIN_ID)
            .map(|p| p.token_address)
            .collect())
    }
}

#[async_trait]
impl MarketData for DexScreenerMarket {
    fn source(&self) -> String {
        "dexscreener".to_string()
    }

    async fn price(&self, token_id: &str) -> Result<f64> {
        let pair = self.pair(token_id).await?;
        pair.price_native
            .parse::<f64>()
            .context("priceNative is not a number")
    }

    async fn liquidity(&self, token_id: &str) -> Result<f64> {
        Ok(self.pair(token_id).await?.liquidity_usd())
    }
}

/// Polls newly profiled Solana tokens and emits one snapshot per new token
pub struct DexScreenerDetector {
    market: Arc<DexScreenerMarket>,
    poll_interval: Duration,
    /// Tokens already emitted; a token re-listed after the TTL is emitted again
    seen: Cache<String, ()>,
}

impl DexScreenerDetector {
    pub fn new(market: Arc<DexScreenerMarket>, poll_interval: Duration) -> Self {
        Self {
            market,
            poll_interval,
            seen: seen_cache(SEEN_TOKEN_TTL),
        }
    }

    /// Whether `token` has not been emitted within the TTL; marks it seen
    async fn first_sighting(&self, token: &str) -> bool {
        if self.seen.contains_key(token) {
            return false;
        }
        self.seen.insert(token.to_string(), ()).await;
        true
    }

    pub fn spawn(self, sender: mpsc::Sender<TokenSnapshot>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(sender, cancel).await })
    }

    async fn run(self, sender: mpsc::Sender<TokenSnapshot>, cancel: CancellationToken) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(poll_ms = self.poll_interval.as_millis() as u64, "DexScreener detector started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutdown requested; stopping DexScreener detector");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let tokens = match self.market.latest_profiles().await {
                Ok(tokens) => tokens,
                Err(e) => {
                    warn!(error = %e, "Failed to poll DexScreener profiles");
                    continue;
                }
            };

            for token in tokens {
                if !self.first_sighting(&token).await {
                    continue;
                }
                match self.market.snapshot(&token).await {
                    Ok(snapshot) => {
                        debug!(token = %token, symbol = %snapshot.symbol, "Detected token");
                        if sender.send(snapshot).await.is_err() {
                            info!("Detector feed receiver dropped; stopping");
                            return;
                        }
                    }
                    Err(e) => debug!(token = %token, error = %e, "Skipping token without usable pair"),
                }
            }
        }
    }
}

fn seen_cache(ttl: Duration) -> Cache<String, ()> {
    Cache::builder()
        .max_capacity(SEEN_TOKEN_CAPACITY)
        .time_to_live(ttl)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAIRS: &str = r#"{"schemaVersion":"1.0.0","pairs":[
        {"chainId":"solana","dexId":"raydium","pairAddress":"P1",
         "baseToken":{"address":"MintT","name":"Turbo","symbol":"TURBO"},
         "quoteToken":{"address":"So11111111111111111111111111111111111111112","name":"Wrapped SOL","symbol":"SOL"},
         "priceNative":"0.0000125","priceUsd":"0.0019",
         "liquidity":{"usd":120000.5,"base":1,"quote":2},
         "volume":{"h24":150000,"h1":9000},
         "priceChange":{"m5":3.5,"h1":12.0},
         "pairCreatedAt":1700000000000,
         "info":{"websites":[{"label":"Website","url":"https://turbo.example"}],"socials":[{"type":"twitter","url":"https://x.com/turbo"}]}},
        {"chainId":"solana","dexId":"orca","pairAddress":"P2",
         "baseToken":{"address":"MintT","name":"Turbo","symbol":"TURBO"},
         "quoteToken":{"address":"So11111111111111111111111111111111111111112","name":"Wrapped SOL","symbol":"SOL"},
         "priceNative":"0.0000126",
         "liquidity":{"usd":2000}},
        {"chainId":"solana","dexId":"raydium","pairAddress":"P3",
         "baseToken":{"address":"MintT","name":"Turbo","symbol":"TURBO"},
         "quoteToken":{"address":"EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v","name":"USD Coin","symbol":"USDC"},
         "priceNative":"0.0019",
         "liquidity":{"usd":900000}}
    ]}"#;

    #[test]
    fn test_best_pair_prefers_deepest_sol_pair() {
        let response: TokensResponse = serde_json::from_str(PAIRS).unwrap();
        let pair = best_pair(response.pairs.unwrap(), "MintT").unwrap();
        assert_eq!(pair.pair_address, "P1");
    }

    #[test]
    fn test_snapshot_from_pair() {
        let response: TokensResponse = serde_json::from_str(PAIRS).unwrap();
        let pair = best_pair(response.pairs.unwrap(), "MintT").unwrap();
        let snapshot = pair.to_snapshot().unwrap();

        assert_eq!(snapshot.symbol, "TURBO");
        assert!((snapshot.price - 0.0000125).abs() < 1e-15);
        assert_eq!(snapshot.volume_24h_usd, 150_000.0);
        assert_eq!(snapshot.price_change_1h_pct, Some(12.0));
        assert!(snapshot.social.website);
        assert!(snapshot.social.twitter);
        assert!(!snapshot.social.telegram);
        assert!(snapshot.age > Duration::from_secs(0));
    }

    #[test]
    fn test_missing_pairs() {
        let response: TokensResponse =
            serde_json::from_str(r#"{"schemaVersion":"1.0.0","pairs":null}"#).unwrap();
        assert!(best_pair(response.pairs.unwrap_or_default(), "MintT").is_none());
    }

    #[tokio::test]
    async fn test_seen_tokens_expire() {
        let market = Arc::new(DexScreenerMarket::new(Duration::from_secs(1)).unwrap());
        let detector = DexScreenerDetector {
            seen: seen_cache(Duration::from_millis(50)),
            ..DexScreenerDetector::new(market, Duration::from_secs(1))
        };

        assert!(detector.first_sighting("MintT").await);
        assert!(!detector.first_sighting("MintT").await);
        assert!(detector.first_sighting("MintU").await);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(detector.first_sighting("MintT").await);
    }
}
