// Position lifecycle tests: entries, ladder exits, stop loss and rug pulls
//
// Run with:
//   cargo test --test lifecycle_tests

mod helpers;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use helpers::{turbo_snapshot, FakeMarket, GatedExecutor};
use sniper_core::chain::{IntentKind, SignatureStatus, TradeExecutor, Urgency};
use sniper_core::strategy::{
    ExecutionReport, LifecycleConfig, LifecycleManager, MarketData, PositionStatus, PriceAggregator,
};

const TOKEN: &str = "TurboMint1111";

struct Harness {
    manager: LifecycleManager,
    reports: mpsc::UnboundedReceiver<ExecutionReport>,
    executor: Arc<GatedExecutor>,
    market: Arc<FakeMarket>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(LifecycleConfig::default())
    }

    fn with_config(config: LifecycleConfig) -> Self {
        let executor = GatedExecutor::new();
        let market = FakeMarket::new();
        market.set_price(TOKEN, 1.0);
        market.set_liquidity(TOKEN, 120_000.0);

        let sources: Vec<Arc<dyn MarketData>> = vec![market.clone() as Arc<dyn MarketData>];
        let aggregator = Arc::new(PriceAggregator::new(sources, Duration::from_millis(200)));
        let (manager, reports) = LifecycleManager::new(
            executor.clone() as Arc<dyn TradeExecutor>,
            aggregator,
            None,
            config,
        );

        Self {
            manager,
            reports,
            executor,
            market,
        }
    }

    /// Open a position at price 1.0 and apply its confirmed entry
    async fn open(&mut self) {
        assert!(self.manager.open_position(&turbo_snapshot(TOKEN, 1.0)).await.unwrap());
        let status = self.resolve_next().await;
        assert_eq!(status, Some(PositionStatus::Open));
    }

    async fn resolve_next(&mut self) -> Option<PositionStatus> {
        let report = tokio::time::timeout(Duration::from_secs(2), self.reports.recv())
            .await
            .expect("no execution report")
            .expect("report channel closed");
        self.manager.apply_report(report).await
    }

    async fn wait_for_calls(&self, n: usize) {
        for _ in 0..1_000 {
            if self.executor.intents().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("executor saw {} calls, expected {}", self.executor.intents().len(), n);
    }

    fn exit_amounts(&self) -> Vec<f64> {
        self.executor
            .intents()
            .into_iter()
            .filter(|(intent, _)| intent.kind == IntentKind::Exit)
            .map(|(intent, _)| intent.amount)
            .collect()
    }

    /// Take rung 0 at price 2.0 with an exit that times out as `sig-2`
    async fn time_out_first_rung(&mut self) {
        self.executor.set_timing_out(true);
        self.market.set_price(TOKEN, 2.0);
        assert_eq!(self.manager.tick().await, 1);
        assert_eq!(self.resolve_next().await, Some(PositionStatus::Open));
        self.executor.set_timing_out(false);
    }
}

#[tokio::test]
async fn test_stop_loss_issues_single_exit_across_ticks() {
    let mut h = Harness::new();
    h.open().await;

    h.executor.hold();
    h.market.set_price(TOKEN, 0.6);

    assert_eq!(h.manager.tick().await, 1);
    assert_eq!(h.manager.tick().await, 0);
    h.wait_for_calls(2).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.executor.intents().len(), 2);

    let (intent, urgency) = h.executor.intents()[1].clone();
    assert_eq!(intent.kind, IntentKind::Exit);
    assert_eq!(urgency, Urgency::High);
    assert!((intent.amount - 0.1).abs() < 1e-12);

    h.executor.release(1);
    assert_eq!(h.resolve_next().await, Some(PositionStatus::Closed));
    assert!(h.manager.position(TOKEN).is_none());
}

#[tokio::test]
async fn test_double_price_exits_first_rung_only() {
    let mut h = Harness::new();
    h.open().await;

    h.executor.hold();
    h.market.set_price(TOKEN, 2.0);

    assert_eq!(h.manager.tick().await, 1);
    assert_eq!(h.manager.tick().await, 0);

    let position = h.manager.position(TOKEN).unwrap();
    assert!(position.take_profit_ladder[0].triggered);
    assert!(!position.take_profit_ladder[1].triggered);
    let pending = position.pending_exit.unwrap();
    assert!((pending.fraction - 0.25).abs() < 1e-12);

    h.wait_for_calls(2).await;
    h.executor.release(1);
    assert_eq!(h.resolve_next().await, Some(PositionStatus::PartiallyExited));

    let position = h.manager.position(TOKEN).unwrap();
    assert!((position.tokens_held - 0.075).abs() < 1e-12);
    assert!((position.exited_pct - 25.0).abs() < 1e-9);
    assert!(position.pending_exit.is_none());

    // Same price again: the first rung stays spent
    assert_eq!(h.manager.tick().await, 0);
}

#[tokio::test]
async fn test_failed_exit_rearms_rung() {
    let mut h = Harness::new();
    h.open().await;

    h.executor.set_failing(true);
    h.market.set_price(TOKEN, 2.0);

    assert_eq!(h.manager.tick().await, 1);
    assert_eq!(h.resolve_next().await, Some(PositionStatus::Open));

    let position = h.manager.position(TOKEN).unwrap();
    assert!(!position.take_profit_ladder[0].triggered);
    assert_eq!(position.consecutive_exit_failures, 1);

    h.executor.set_failing(false);
    assert_eq!(h.manager.tick().await, 1);
    assert_eq!(h.resolve_next().await, Some(PositionStatus::PartiallyExited));
}

#[tokio::test]
async fn test_rug_pull_during_pending_exit_fires_after_resolution() {
    let mut h = Harness::new();
    h.open().await;

    h.executor.hold();
    h.market.set_price(TOKEN, 2.0);
    assert_eq!(h.manager.tick().await, 1);
    h.wait_for_calls(2).await;

    assert!(h.manager.signal_rug_pull(TOKEN));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.executor.intents().len(), 2);

    h.executor.release(1);
    assert_eq!(h.resolve_next().await, Some(PositionStatus::PartiallyExited));

    h.wait_for_calls(3).await;
    let (rug_exit, urgency) = h.executor.intents()[2].clone();
    assert!(rug_exit.emergency);
    assert_eq!(urgency, Urgency::Urgent);
    assert!((rug_exit.amount - 0.075).abs() < 1e-12);

    h.executor.release(1);
    assert_eq!(h.resolve_next().await, Some(PositionStatus::Closed));
    assert_eq!(h.manager.position_count(), 0);
}

#[tokio::test]
async fn test_rug_pull_for_unknown_token_is_ignored() {
    let h = Harness::new();
    assert!(!h.manager.signal_rug_pull("NotHeld"));
    assert!(h.executor.intents().is_empty());
}

#[tokio::test]
async fn test_timed_out_exit_that_lands_late_sells_rung_once() {
    let mut h = Harness::new();
    h.open().await;
    h.time_out_first_rung().await;

    let position = h.manager.position(TOKEN).unwrap();
    assert!(position.take_profit_ladder[0].triggered);
    assert!(position.pending_exit.is_some());
    assert_eq!(position.unresolved_exit.unwrap().signatures, vec!["sig-2".to_string()]);
    assert!((position.tokens_held - 0.1).abs() < 1e-12);
    assert_eq!(position.consecutive_exit_failures, 0);

    // Still unknown: nothing settles and no tick re-sells the rung
    assert_eq!(h.manager.reconcile_unresolved().await, 0);
    assert_eq!(h.manager.tick().await, 0);
    assert_eq!(h.manager.tick().await, 0);

    h.executor
        .set_signature_status("sig-2", SignatureStatus::Confirmed { slot: 42 });
    assert_eq!(h.manager.reconcile_unresolved().await, 1);

    let position = h.manager.position(TOKEN).unwrap();
    assert_eq!(position.status, PositionStatus::PartiallyExited);
    assert!((position.tokens_held - 0.075).abs() < 1e-12);
    assert!((position.realized_sol - 0.05).abs() < 1e-12);
    assert!(position.pending_exit.is_none());
    assert!(position.unresolved_exit.is_none());

    assert_eq!(h.manager.tick().await, 0);
    assert_eq!(h.exit_amounts(), vec![0.025]);
}

#[tokio::test]
async fn test_timed_out_exit_rejected_on_chain_rearms_rung() {
    let mut h = Harness::new();
    h.open().await;
    h.time_out_first_rung().await;

    h.executor.set_signature_status(
        "sig-2",
        SignatureStatus::Failed("InstructionError(2, Custom(6001))".to_string()),
    );
    assert_eq!(h.manager.reconcile_unresolved().await, 1);

    let position = h.manager.position(TOKEN).unwrap();
    assert_eq!(position.status, PositionStatus::Open);
    assert!(!position.take_profit_ladder[0].triggered);
    assert_eq!(position.consecutive_exit_failures, 1);
    assert!(position.pending_exit.is_none());

    assert_eq!(h.manager.tick().await, 1);
    assert_eq!(h.resolve_next().await, Some(PositionStatus::PartiallyExited));
    assert_eq!(h.exit_amounts(), vec![0.025, 0.025]);
}

#[tokio::test]
async fn test_unresolved_exit_fails_after_expiry() {
    let mut h = Harness::with_config(LifecycleConfig {
        unresolved_exit_expiry: Duration::from_millis(20),
        ..LifecycleConfig::default()
    });
    h.open().await;
    h.time_out_first_rung().await;

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(h.manager.reconcile_unresolved().await, 1);

    let position = h.manager.position(TOKEN).unwrap();
    assert!(!position.take_profit_ladder[0].triggered);
    assert_eq!(position.consecutive_exit_failures, 1);
    assert!(h.manager.unresolved_exits().is_empty());
}

#[tokio::test]
async fn test_rug_pull_waits_for_unresolved_exit() {
    let mut h = Harness::new();
    h.open().await;
    h.time_out_first_rung().await;

    assert!(h.manager.signal_rug_pull(TOKEN));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.executor.intents().len(), 2);

    h.executor
        .set_signature_status("sig-2", SignatureStatus::Confirmed { slot: 42 });
    assert_eq!(h.manager.reconcile_unresolved().await, 1);

    h.wait_for_calls(3).await;
    let (rug_exit, urgency) = h.executor.intents()[2].clone();
    assert!(rug_exit.emergency);
    assert_eq!(urgency, Urgency::Urgent);
    assert!((rug_exit.amount - 0.075).abs() < 1e-12);
    assert_eq!(h.resolve_next().await, Some(PositionStatus::Closed));
}
