// End-to-end engine tests: detection -> scoring -> entry -> exit -> shutdown
//
// Run with:
//   cargo test --test end_to_end

mod helpers;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use helpers::{bundler, fast_bundler_config, fast_pool, turbo_snapshot, FakeChain, FakeMarket, StatusMode};
use sniper_core::chain::{BundlerConfig, IntentKind, TradeExecutor};
use sniper_core::data::{TradeHistory, TradeStorage};
use sniper_core::strategy::{
    LifecycleConfig, LifecycleManager, MarketData, OpportunityScorer, PositionStatus,
    PriceAggregator, Recommendation, ScoringConfig, TokenSnapshot,
};
use sniper_core::{DetectorFeed, Engine, EngineConfig, EngineContext, EngineEvent, EngineHandle, EventBus};

const TOKEN: &str = "TurboMint1111";

struct Setup {
    engine: EngineHandle,
    feed: mpsc::Sender<TokenSnapshot>,
    events: broadcast::Receiver<EngineEvent>,
    market: Arc<FakeMarket>,
    node: Arc<FakeChain>,
}

fn start(status: StatusMode, bundler_config: BundlerConfig, history: Option<Arc<dyn TradeHistory>>) -> Setup {
    let node = FakeChain::new("node-a", status);
    let bundler = Arc::new(bundler(fast_pool(&[node.clone()]), None, bundler_config));

    let market = FakeMarket::new();
    market.set_price(TOKEN, 0.000_01);
    market.set_liquidity(TOKEN, 120_000.0);
    let sources: Vec<Arc<dyn MarketData>> = vec![market.clone() as Arc<dyn MarketData>];
    let aggregator = Arc::new(PriceAggregator::new(sources, Duration::from_millis(200)));

    let lifecycle_config = LifecycleConfig {
        tick_interval: Duration::from_millis(25),
        ..LifecycleConfig::default()
    };
    let (lifecycle, reports) = LifecycleManager::new(
        bundler.clone() as Arc<dyn TradeExecutor>,
        aggregator,
        history,
        lifecycle_config,
    );

    let events = EventBus::default();
    let subscriber = events.subscribe();
    let context = EngineContext {
        scorer: Arc::new(OpportunityScorer::new(ScoringConfig::default())),
        lifecycle: Arc::new(lifecycle),
        bundler,
        events,
        config: EngineConfig {
            shutdown_grace: Duration::from_millis(500),
            reconcile_interval: Duration::from_millis(20),
            drain_poll_interval: Duration::from_millis(10),
        },
    };

    let (tx, rx) = mpsc::channel(16);
    let engine = Engine::start(context, reports, vec![DetectorFeed::new("solana", rx)]);
    Setup {
        engine,
        feed: tx,
        events: subscriber,
        market,
        node,
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn test_turbo_candidate_is_bought_then_stopped_out() {
    let dir = tempfile::tempdir().unwrap();
    let storage = TradeStorage::new(dir.path().join("trades.jsonl"));
    let mut setup = start(
        StatusMode::Confirm(1_000),
        fast_bundler_config(),
        Some(Arc::new(storage.clone()) as Arc<dyn TradeHistory>),
    );

    setup.feed.send(turbo_snapshot(TOKEN, 0.000_01)).await.unwrap();

    let lifecycle = Arc::clone(&setup.engine.context().lifecycle);
    wait_until("position to open", || {
        lifecycle
            .position(TOKEN)
            .map_or(false, |p| p.status == PositionStatus::Open)
    })
    .await;

    let position = lifecycle.position(TOKEN).unwrap();
    let entry = position.entry_price;
    assert!((entry - 0.000_01).abs() < 1e-15);
    assert!((position.stop_loss_price - entry * 0.7).abs() < 1e-15);
    let ladder: Vec<(f64, f64)> = position
        .take_profit_ladder
        .iter()
        .map(|r| (r.price / entry, r.percentage))
        .collect();
    for ((multiple, pct), (want_multiple, want_pct)) in
        ladder.iter().zip([(2.0, 25.0), (5.0, 50.0), (10.0, 100.0)])
    {
        assert!((multiple - want_multiple).abs() < 1e-9);
        assert_eq!(*pct, want_pct);
    }

    let mut names = Vec::new();
    while let Ok(event) = setup.events.try_recv() {
        if let EngineEvent::TokenAnalysisComplete { recommendation, aggregate, .. } = &event {
            assert_eq!(*recommendation, Recommendation::Buy);
            assert!(*aggregate >= 70.0);
        }
        names.push(event.name());
    }
    assert_eq!(
        names,
        vec!["new_token_detected", "token_analysis_complete", "potential_opportunity"]
    );

    // 50% drawdown trips the 0.7 stop loss on the next monitoring tick
    setup.market.set_price(TOKEN, 0.000_005);
    wait_until("position to close", || lifecycle.position(TOKEN).is_none()).await;

    let report = setup.engine.shutdown().await;
    assert!(report.drained);
    assert_eq!(report.force_cleared, 0);

    let mut records = Vec::new();
    for _ in 0..100 {
        records = storage.load_all_records().await.unwrap();
        if records.len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(records.len(), 2);
    let entry = records.iter().find(|r| r.side == IntentKind::Entry).unwrap();
    let exit = records.iter().find(|r| r.side == IntentKind::Exit).unwrap();
    assert!(entry.success && exit.success);
    assert_eq!(exit.reason, "stop_loss");
}

#[tokio::test]
async fn test_exit_that_lands_after_timeout_is_settled_by_reconciliation() {
    let setup = start(StatusMode::Confirm(1_000), fast_bundler_config(), None);
    setup.feed.send(turbo_snapshot(TOKEN, 0.000_01)).await.unwrap();

    let lifecycle = Arc::clone(&setup.engine.context().lifecycle);
    wait_until("position to open", || {
        lifecycle
            .position(TOKEN)
            .map_or(false, |p| p.status == PositionStatus::Open)
    })
    .await;
    let initial = lifecycle.position(TOKEN).unwrap().initial_tokens;

    // The first rung's sell is sent but its confirmation never shows up in time
    setup.node.set_status(StatusMode::NeverLands);
    setup.market.set_price(TOKEN, 0.000_02);
    wait_until("exit to time out", || {
        lifecycle
            .position(TOKEN)
            .map_or(false, |p| p.unresolved_exit.is_some())
    })
    .await;
    let position = lifecycle.position(TOKEN).unwrap();
    assert!(position.take_profit_ladder[0].triggered);
    assert_eq!(position.tokens_held, initial);

    setup.node.set_status(StatusMode::Confirm(2_000));
    wait_until("late confirmation to settle", || {
        lifecycle
            .position(TOKEN)
            .map_or(false, |p| p.status == PositionStatus::PartiallyExited)
    })
    .await;

    // Later ticks at the same price leave the spent rung alone
    tokio::time::sleep(Duration::from_millis(100)).await;
    let position = lifecycle.position(TOKEN).unwrap();
    assert!(position.unresolved_exit.is_none());
    assert!(position.pending_exit.is_none());
    assert!((position.tokens_held - initial * 0.75).abs() < initial * 1e-9);
    assert!((position.exited_pct - 25.0).abs() < 1e-6);

    let report = setup.engine.shutdown().await;
    assert!(report.drained);
}

#[tokio::test]
async fn test_low_quality_candidate_is_passed() {
    let mut setup = start(StatusMode::Confirm(1), fast_bundler_config(), None);

    let mut token = turbo_snapshot("RugMint", 0.000_01);
    token.symbol = "SCAM".to_string();
    token.name = "Totally Not A Rug".to_string();
    token.liquidity_usd = 1_000.0;
    token.volume_24h_usd = 500.0;
    token.social = Default::default();
    setup.feed.send(token).await.unwrap();

    let event = loop {
        let event = tokio::time::timeout(Duration::from_secs(2), setup.events.recv())
            .await
            .unwrap()
            .unwrap();
        if let EngineEvent::TokenAnalysisComplete { .. } = event {
            break event;
        }
    };
    match event {
        EngineEvent::TokenAnalysisComplete { recommendation, .. } => {
            assert_eq!(recommendation, Recommendation::Pass)
        }
        other => panic!("unexpected event {}", other.name()),
    }

    assert_eq!(setup.engine.context().lifecycle.position_count(), 0);
    let report = setup.engine.shutdown().await;
    assert!(report.drained);
}

#[tokio::test]
async fn test_shutdown_force_clears_unresolved_entry() {
    let config = BundlerConfig {
        confirmation_timeout: Duration::from_secs(10),
        ..fast_bundler_config()
    };
    let setup = start(StatusMode::NeverLands, config, None);

    setup.feed.send(turbo_snapshot(TOKEN, 0.000_01)).await.unwrap();
    let bundler = Arc::clone(&setup.engine.context().bundler);
    wait_until("entry submission", || bundler.pending_count() == 1).await;

    let report = setup.engine.shutdown().await;
    assert!(!report.drained);
    assert_eq!(report.force_cleared, 1);
    assert_eq!(bundler.pending_count(), 0);
}

#[tokio::test]
async fn test_rug_signal_publishes_event() {
    let mut setup = start(StatusMode::Confirm(1), fast_bundler_config(), None);

    assert!(!setup.engine.signal_rug_pull("NotHeld"));
    let event = tokio::time::timeout(Duration::from_secs(1), setup.events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.name(), "rug_pull_detected");

    setup.engine.shutdown().await;
}
