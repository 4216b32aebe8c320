use anyhow::{Context, Result};
use solana_sdk::commitment_config::CommitmentConfig;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sniper_core::adapters::{
    DexScreenerDetector, DexScreenerMarket, JitoRelay, JupiterPriceFeed, JupiterSwapBuilder,
    KeypairWallet, SolanaRpcNode,
};
use sniper_core::chain::{
    BundleRelay, ChainClient, FeeOptimizer, RpcPool, TradeExecutor, TransactionBundler, Wallet,
};
use sniper_core::config::Config;
use sniper_core::data::{TradeHistory, TradeStorage};
use sniper_core::strategy::{LifecycleManager, MarketData, OpportunityScorer, PriceAggregator};
use sniper_core::utils::init_logging;
use sniper_core::{DetectorFeed, Engine, EngineContext, EventBus};

const DETECTOR_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    let _log_guard = init_logging(&config.monitoring)?;

    info!("Starting sniper execution core");

    let wallet = Arc::new(KeypairWallet::load(&config.wallet)?);
    info!(wallet = %wallet.address(), "Wallet loaded");

    // Transport
    let commitment = CommitmentConfig::from_str(&config.rpc.commitment_level)
        .context("Invalid COMMITMENT_LEVEL")?;
    let rpc_timeout = Duration::from_secs(config.rpc.timeout_seconds);
    let providers: Vec<(Arc<dyn ChainClient>, f64)> = config
        .rpc
        .providers
        .iter()
        .map(|p| {
            let node: Arc<dyn ChainClient> =
                Arc::new(SolanaRpcNode::new(&p.url, commitment, rpc_timeout));
            (node, p.weight)
        })
        .collect();
    let pool = Arc::new(
        RpcPool::with_health_window(providers, config.rpc.health_window).with_retry(
            config.rpc.retries,
            Duration::from_millis(config.rpc.base_delay_ms),
        ),
    );
    info!(providers = config.rpc.providers.len(), commitment = %config.rpc.commitment_level, "RPC pool ready");

    let fees = Arc::new(FeeOptimizer::new(Arc::clone(&pool), config.fees.clone()));

    let relay: Option<Arc<dyn BundleRelay>> = if config.relay.enabled {
        info!(url = %config.relay.url, tip = config.relay.tip_lamports, "Bundle relay enabled");
        Some(Arc::new(JitoRelay::new(&config.relay.url, rpc_timeout)?))
    } else {
        info!("Bundle relay disabled");
        None
    };
    let tip_floor = config.relay.enabled.then_some(config.relay.tip_lamports);

    let market_timeout = Duration::from_millis(config.monitoring.market_timeout_ms);
    let builder = Arc::new(JupiterSwapBuilder::new(Arc::clone(&pool), tip_floor, rpc_timeout)?);
    let bundler = Arc::new(TransactionBundler::new(
        Arc::clone(&pool),
        fees,
        builder,
        wallet,
        relay,
        config.bundler.clone(),
    ));
    let tiers: Vec<String> = bundler.tiers().iter().map(|t| t.to_string()).collect();
    info!(tiers = %tiers.join(" -> "), "Transaction bundler ready");

    // Market data
    let dexscreener = Arc::new(DexScreenerMarket::new(market_timeout)?);
    let jupiter_prices = Arc::new(JupiterPriceFeed::new(market_timeout)?);
    let sources: Vec<Arc<dyn MarketData>> = vec![
        dexscreener.clone() as Arc<dyn MarketData>,
        jupiter_prices as Arc<dyn MarketData>,
    ];
    let market = Arc::new(PriceAggregator::new(sources, market_timeout));

    let history: Arc<dyn TradeHistory> =
        Arc::new(TradeStorage::new(&config.storage.trade_history_path));
    info!(path = %config.storage.trade_history_path, "Trade history enabled");

    let executor: Arc<dyn TradeExecutor> = bundler.clone();
    let (lifecycle, reports) =
        LifecycleManager::new(executor, market, Some(history), config.lifecycle.clone());

    let context = EngineContext {
        scorer: Arc::new(OpportunityScorer::new(config.scoring.clone())),
        lifecycle: Arc::new(lifecycle),
        bundler,
        events: EventBus::default(),
        config: config.engine.clone(),
    };

    // Detection
    let detector_cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(DETECTOR_CHANNEL_CAPACITY);
    let detector = DexScreenerDetector::new(
        dexscreener,
        Duration::from_millis(config.monitoring.detector_poll_interval_ms),
    )
    .spawn(tx, detector_cancel.clone());

    let engine = Engine::start(context, reports, vec![DetectorFeed::new("solana", rx)]);

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received");

    detector_cancel.cancel();
    if let Err(e) = detector.await {
        warn!(error = %e, "Detector task ended abnormally");
    }

    let report = engine.shutdown().await;
    if !report.drained {
        warn!(
            force_cleared = report.force_cleared,
            "Shutdown grace elapsed with submissions unresolved"
        );
    }
    info!("Goodbye");
    Ok(())
}
