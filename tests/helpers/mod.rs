// Helper utilities for execution-core integration tests
//
// This module provides in-memory collaborators:
// - Scriptable chain nodes, relay, wallet and swap builder for the bundler
// - A settable market feed for the lifecycle manager
// - A gated executor that can hold submissions in flight

#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

use sniper_core::chain::{
    BundleRelay, BundleStatus, BundlerConfig, ChainClient, FeeConfig, FeeOptimizer, RpcPool,
    SignatureStatus, SignedTransaction, SubmissionResult, SubmissionTier, SwapBuilder,
    TradeExecutor, TradeIntent, TransactionBundler, TxDetail, TxOutcome, UnsignedTransaction,
    Urgency, Wallet,
};
use sniper_core::error::{ExecutionError, RpcError};
use sniper_core::strategy::{MarketData, SocialFlags, TokenSnapshot};

/// How a fake node answers status queries for sent transactions
#[derive(Debug, Clone, PartialEq)]
pub enum StatusMode {
    Confirm(u64),
    Reject(String),
    NeverLands,
}

/// In-memory node endpoint
pub struct FakeChain {
    endpoint: String,
    healthy: AtomicBool,
    status: Mutex<StatusMode>,
    fees: Vec<u64>,
    pub sends: AtomicU32,
    pub sent: Mutex<Vec<String>>,
}

impl FakeChain {
    pub fn new(endpoint: &str, status: StatusMode) -> Arc<Self> {
        Arc::new(Self {
            endpoint: endpoint.to_string(),
            healthy: AtomicBool::new(true),
            status: Mutex::new(status),
            fees: (1..=20).map(|n| n * 1_000).collect(),
            sends: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_status(&self, status: StatusMode) {
        *self.status.lock().unwrap() = status;
    }

    pub fn sent_signatures(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), RpcError> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RpcError::Transport(format!("{} unreachable", self.endpoint)))
        }
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn recent_priority_fees(&self) -> Result<Vec<u64>, RpcError> {
        self.check()?;
        Ok(self.fees.clone())
    }

    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<String, RpcError> {
        self.check()?;
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(tx.signature.clone());
        Ok(tx.signature.clone())
    }

    async fn signature_status(&self, signature: &str) -> Result<SignatureStatus, RpcError> {
        self.check()?;
        if !self.sent.lock().unwrap().iter().any(|s| s == signature) {
            return Ok(SignatureStatus::Pending);
        }
        Ok(match self.status.lock().unwrap().clone() {
            StatusMode::Confirm(slot) => SignatureStatus::Confirmed { slot },
            StatusMode::Reject(reason) => SignatureStatus::Failed(reason),
            StatusMode::NeverLands => SignatureStatus::Pending,
        })
    }

    async fn token_decimals(&self, _mint: &str) -> Result<u8, RpcError> {
        self.check()?;
        Ok(6)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayMode {
    FailSend,
    Land(u64),
    Reject,
    /// Accepts the bundle but never reports it landed
    NeverLands,
}

pub struct FakeRelay {
    mode: RelayMode,
    pub bundles: AtomicU32,
}

impl FakeRelay {
    pub fn new(mode: RelayMode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            bundles: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl BundleRelay for FakeRelay {
    fn name(&self) -> &str {
        "fake-relay"
    }

    async fn send_bundle(&self, _txs: &[SignedTransaction]) -> Result<String, ExecutionError> {
        self.bundles.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            RelayMode::FailSend => Err(ExecutionError::BundleSubmission {
                relay: self.name().to_string(),
                bundle_id: None,
                reason: "relay unavailable".to_string(),
            }),
            _ => Ok("bundle-1".to_string()),
        }
    }

    async fn bundle_status(&self, _bundle_id: &str) -> Result<BundleStatus, ExecutionError> {
        Ok(match self.mode {
            RelayMode::Land(slot) => BundleStatus::Confirmed { slot },
            RelayMode::Reject => BundleStatus::Rejected("simulation failed".to_string()),
            RelayMode::FailSend | RelayMode::NeverLands => BundleStatus::Pending,
        })
    }
}

/// Signs by deriving a deterministic signature from the payload and fee
pub struct FakeWallet;

impl Wallet for FakeWallet {
    fn address(&self) -> String {
        "FakePayer1111111111111111111111111111111111".to_string()
    }

    fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, ExecutionError> {
        Ok(SignedTransaction {
            signature: format!("sig-{}-{}", tx.token_id, tx.priority_fee),
            payload: tx.payload.clone(),
            priority_fee: tx.priority_fee,
        })
    }
}

pub struct FakeSwapBuilder {
    pub builds: AtomicU32,
}

impl FakeSwapBuilder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            builds: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl SwapBuilder for FakeSwapBuilder {
    async fn build(
        &self,
        intent: &TradeIntent,
        priority_fee: u64,
        _payer: &str,
    ) -> Result<UnsignedTransaction, ExecutionError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(UnsignedTransaction {
            token_id: intent.token_id.clone(),
            payload: format!("{}:{}:{}", intent.kind, intent.token_id, intent.amount).into_bytes(),
            priority_fee,
        })
    }
}

/// Pool over the given nodes with a single fast attempt per call
pub fn fast_pool(nodes: &[Arc<FakeChain>]) -> Arc<RpcPool> {
    let providers: Vec<(Arc<dyn ChainClient>, f64)> = nodes
        .iter()
        .map(|n| (Arc::clone(n) as Arc<dyn ChainClient>, 1.0))
        .collect();
    Arc::new(RpcPool::new(providers).with_retry(1, Duration::ZERO))
}

pub fn fast_bundler_config() -> BundlerConfig {
    BundlerConfig {
        use_relay: true,
        parallel_enabled: true,
        send_retries: 2,
        send_retry_delay: Duration::from_millis(5),
        confirmation_timeout: Duration::from_millis(150),
        poll_interval: Duration::from_millis(10),
        bundle_timeout: Duration::from_millis(100),
        bundle_poll_interval: Duration::from_millis(10),
        entry_backup_fee_multiplier: None,
    }
}

pub fn bundler(
    pool: Arc<RpcPool>,
    relay: Option<Arc<FakeRelay>>,
    config: BundlerConfig,
) -> TransactionBundler {
    let fees = Arc::new(FeeOptimizer::new(Arc::clone(&pool), FeeConfig::default()));
    TransactionBundler::new(
        pool,
        fees,
        FakeSwapBuilder::new(),
        Arc::new(FakeWallet),
        relay.map(|r| r as Arc<dyn BundleRelay>),
        config,
    )
}

/// Market feed whose prices and liquidity are set by the test
#[derive(Default)]
pub struct FakeMarket {
    prices: DashMap<String, f64>,
    liquidity: DashMap<String, f64>,
}

impl FakeMarket {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_price(&self, token_id: &str, price: f64) {
        self.prices.insert(token_id.to_string(), price);
    }

    pub fn set_liquidity(&self, token_id: &str, liquidity_usd: f64) {
        self.liquidity.insert(token_id.to_string(), liquidity_usd);
    }
}

#[async_trait]
impl MarketData for FakeMarket {
    fn source(&self) -> String {
        "fake".to_string()
    }

    async fn price(&self, token_id: &str) -> anyhow::Result<f64> {
        self.prices
            .get(token_id)
            .map(|p| *p)
            .ok_or_else(|| anyhow::anyhow!("no price for {}", token_id))
    }

    async fn liquidity(&self, token_id: &str) -> anyhow::Result<f64> {
        self.liquidity
            .get(token_id)
            .map(|l| *l)
            .ok_or_else(|| anyhow::anyhow!("no liquidity for {}", token_id))
    }
}

/// Executor that records intents and can hold them until released
pub struct GatedExecutor {
    pub calls: Mutex<Vec<(TradeIntent, Urgency)>>,
    held: AtomicBool,
    gate: Semaphore,
    fail: AtomicBool,
    time_out: AtomicBool,
    statuses: DashMap<String, SignatureStatus>,
    pub status_checks: AtomicU32,
}

impl GatedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            held: AtomicBool::new(false),
            gate: Semaphore::new(0),
            fail: AtomicBool::new(false),
            time_out: AtomicBool::new(false),
            statuses: DashMap::new(),
            status_checks: AtomicU32::new(0),
        })
    }

    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Let `n` held submissions through
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Resolve submissions as confirmation timeouts with unknown outcome
    pub fn set_timing_out(&self, time_out: bool) {
        self.time_out.store(time_out, Ordering::SeqCst);
    }

    /// On-chain status reported for `signature`; unknown signatures are pending
    pub fn set_signature_status(&self, signature: &str, status: SignatureStatus) {
        self.statuses.insert(signature.to_string(), status);
    }

    pub fn intents(&self) -> Vec<(TradeIntent, Urgency)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TradeExecutor for GatedExecutor {
    async fn submit(&self, intent: &TradeIntent, urgency: Urgency) -> SubmissionResult {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((intent.clone(), urgency));
            calls.len()
        };

        if self.held.load(Ordering::SeqCst) {
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }

        if self.time_out.load(Ordering::SeqCst) {
            let signature = format!("sig-{}", n);
            let error = ExecutionError::TransactionTimeout {
                signature: signature.clone(),
                timeout_ms: 150,
            };
            let detail = TxDetail {
                signature,
                priority_fee: 10_000,
                tier: SubmissionTier::Parallel,
                outcome: TxOutcome::TimedOut,
                send_attempts: 1,
                error: Some(error.clone()),
            };
            return SubmissionResult::failed(error, vec![detail], Duration::from_millis(150));
        }

        if self.fail.load(Ordering::SeqCst) {
            return SubmissionResult::failed(
                ExecutionError::TransactionFailed {
                    signature: format!("sig-{}", n),
                    reason: "slippage tolerance exceeded".to_string(),
                },
                Vec::new(),
                Duration::from_millis(1),
            );
        }

        SubmissionResult {
            success: true,
            signature: Some(format!("sig-{}", n)),
            error: None,
            tier: Some(SubmissionTier::Parallel),
            details: Vec::new(),
            elapsed: Duration::from_millis(1),
        }
    }

    async fn signature_status(&self, signature: &str) -> Result<SignatureStatus, ExecutionError> {
        self.status_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .statuses
            .get(signature)
            .map(|s| s.value().clone())
            .unwrap_or(SignatureStatus::Pending))
    }
}

/// A well-formed candidate in the style of a fresh DEX listing
pub fn turbo_snapshot(token_id: &str, price: f64) -> TokenSnapshot {
    TokenSnapshot {
        token_id: token_id.to_string(),
        symbol: "TURBO".to_string(),
        name: "Turbo".to_string(),
        liquidity_usd: 120_000.0,
        volume_24h_usd: 150_000.0,
        price,
        age: Duration::from_secs(300),
        price_change_5m_pct: Some(5.0),
        price_change_1h_pct: Some(12.0),
        social: SocialFlags {
            website: true,
            twitter: true,
            telegram: false,
        },
    }
}
