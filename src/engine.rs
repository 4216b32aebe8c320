// Engine: wires the long-lived tasks together
//
// - one ingestion task per detector feed (score -> maybe open)
// - one monitoring task ticking the lifecycle manager
// - one reconciliation task applying execution reports and watching for
//   overdue pending submissions
//
// Shutdown stops intake and monitoring first, lets reconciliation keep
// draining for the grace period, then force-clears whatever is still pending.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chain::TransactionBundler;
use crate::events::{EngineEvent, EventBus};
use crate::strategy::{ExecutionReport, LifecycleManager, OpportunityScorer, TokenSnapshot};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub shutdown_grace: Duration,
    pub reconcile_interval: Duration,
    pub drain_poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shutdown_grace: Duration::from_secs(60),
            reconcile_interval: Duration::from_secs(1),
            drain_poll_interval: Duration::from_millis(100),
        }
    }
}

/// Candidate stream from one chain's detector
pub struct DetectorFeed {
    pub chain: String,
    pub receiver: mpsc::Receiver<TokenSnapshot>,
}

impl DetectorFeed {
    pub fn new(chain: impl Into<String>, receiver: mpsc::Receiver<TokenSnapshot>) -> Self {
        Self {
            chain: chain.into(),
            receiver,
        }
    }
}

/// Owned components shared by the engine tasks
#[derive(Clone)]
pub struct EngineContext {
    pub scorer: Arc<OpportunityScorer>,
    pub lifecycle: Arc<LifecycleManager>,
    pub bundler: Arc<TransactionBundler>,
    pub events: EventBus,
    pub config: EngineConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Everything resolved within the grace period
    pub drained: bool,
    pub force_cleared: usize,
}

pub struct Engine;

impl Engine {
    pub fn start(
        context: EngineContext,
        reports: mpsc::UnboundedReceiver<ExecutionReport>,
        feeds: Vec<DetectorFeed>,
    ) -> EngineHandle {
        let intake = CancellationToken::new();
        let reconcile = CancellationToken::new();
        let mut tasks = Vec::with_capacity(feeds.len() + 1);

        for feed in feeds {
            tasks.push(tokio::spawn(run_ingestion(
                context.clone(),
                feed,
                intake.clone(),
            )));
        }
        tasks.push(tokio::spawn(run_monitoring(context.clone(), intake.clone())));
        let reconciler = tokio::spawn(run_reconciliation(
            context.clone(),
            reports,
            reconcile.clone(),
        ));

        info!(tasks = tasks.len() + 1, "Engine started");

        EngineHandle {
            context,
            intake,
            reconcile,
            tasks,
            reconciler,
        }
    }
}

pub struct EngineHandle {
    context: EngineContext,
    intake: CancellationToken,
    reconcile: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    reconciler: JoinHandle<()>,
}

impl EngineHandle {
    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.context.events.subscribe()
    }

    /// Publish the rug-pull event and exit the position if held
    pub fn signal_rug_pull(&self, token_id: &str) -> bool {
        let held = self.context.lifecycle.signal_rug_pull(token_id);
        self.context.events.publish(EngineEvent::RugPullDetected {
            token_id: token_id.to_string(),
            held,
        });
        held
    }

    pub async fn shutdown(self) -> ShutdownReport {
        let EngineHandle {
            context,
            intake,
            reconcile,
            tasks,
            reconciler,
        } = self;

        info!("Shutting down engine");
        intake.cancel();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Engine task ended abnormally");
            }
        }

        let grace = context.config.shutdown_grace;
        let deadline = Instant::now() + grace;
        let mut drained = true;
        while context.lifecycle.in_flight() > 0 || context.bundler.pending_count() > 0 {
            if Instant::now() >= deadline {
                drained = false;
                break;
            }
            sleep(context.config.drain_poll_interval).await;
        }

        let cleared = context.bundler.force_clear();
        if !cleared.is_empty() {
            warn!(
                count = cleared.len(),
                grace_ms = grace.as_millis() as u64,
                "Pending submissions force-cleared at shutdown"
            );
        }
        context.lifecycle.cancel_submissions();

        reconcile.cancel();
        if let Err(e) = reconciler.await {
            warn!(error = %e, "Reconciliation task ended abnormally");
        }

        info!(drained, force_cleared = cleared.len(), "Engine stopped");
        ShutdownReport {
            drained,
            force_cleared: cleared.len(),
        }
    }
}

async fn run_ingestion(context: EngineContext, mut feed: DetectorFeed, cancel: CancellationToken) {
    info!(chain = %feed.chain, "Detector ingestion started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(chain = %feed.chain, "Shutdown requested; stopping ingestion");
                break;
            }
            maybe_token = feed.receiver.recv() => {
                match maybe_token {
                    Some(token) => handle_candidate(&context, &feed.chain, token).await,
                    None => {
                        info!(chain = %feed.chain, "Detector feed closed");
                        break;
                    }
                }
            }
        }
    }
}

/// Score one candidate and open a position if it clears the threshold
pub async fn handle_candidate(context: &EngineContext, chain: &str, token: TokenSnapshot) {
    context.events.publish(EngineEvent::NewTokenDetected {
        chain: chain.to_string(),
        token: token.clone(),
    });

    let score = context.scorer.score(&token);
    context.events.publish(EngineEvent::TokenAnalysisComplete {
        token_id: token.token_id.clone(),
        aggregate: score.aggregate,
        category: score.category,
        recommendation: score.recommendation,
    });

    if !score.is_buy() {
        debug!(
            token = %token.token_id,
            aggregate = format!("{:.1}", score.aggregate),
            "Candidate passed"
        );
        return;
    }

    info!(
        %chain,
        token = %token.token_id,
        symbol = %token.symbol,
        aggregate = format!("{:.1}", score.aggregate),
        category = %score.category,
        "Potential opportunity"
    );
    context.events.publish(EngineEvent::PotentialOpportunity {
        token_id: token.token_id.clone(),
        symbol: token.symbol.clone(),
        aggregate: score.aggregate,
        price: token.price,
    });

    match context.lifecycle.open_position(&token).await {
        Ok(true) => {}
        Ok(false) => debug!(token = %token.token_id, "Already holding token"),
        Err(e) => warn!(token = %token.token_id, kind = e.kind(), error = %e, "Entry rejected"),
    }
}

async fn run_monitoring(context: EngineContext, cancel: CancellationToken) {
    let mut ticker = interval(context.lifecycle.config().tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Shutdown requested; stopping position monitor");
                break;
            }
            _ = ticker.tick() => {
                let dispatched = context.lifecycle.tick().await;
                if dispatched > 0 {
                    debug!(dispatched, "Monitoring tick dispatched exits");
                }
            }
        }
    }
}

async fn run_reconciliation(
    context: EngineContext,
    mut reports: mpsc::UnboundedReceiver<ExecutionReport>,
    cancel: CancellationToken,
) {
    let mut sweep = interval(context.config.reconcile_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                while let Ok(report) = reports.try_recv() {
                    context.lifecycle.apply_report(report).await;
                }
                context.lifecycle.reconcile_unresolved().await;
                for (token, unresolved) in context.lifecycle.unresolved_exits() {
                    error!(
                        %token,
                        signatures = ?unresolved.signatures,
                        age_ms = unresolved.since.elapsed().as_millis() as u64,
                        "Exit still unresolved at shutdown"
                    );
                }
                info!("Reconciliation stopped");
                break;
            }
            maybe_report = reports.recv() => {
                match maybe_report {
                    Some(report) => {
                        context.lifecycle.apply_report(report).await;
                    }
                    None => {
                        debug!("Report channel closed");
                        break;
                    }
                }
            }
            _ = sweep.tick() => {
                let settled = context.lifecycle.reconcile_unresolved().await;
                if settled > 0 {
                    debug!(settled, "Unresolved exits settled");
                }
                for overdue in context.bundler.overdue_submissions() {
                    warn!(
                        id = overdue.id,
                        kind = %overdue.kind,
                        token = %overdue.token_id,
                        retries = overdue.retry_count,
                        age_ms = overdue.created_at.elapsed().as_millis() as u64,
                        "Pending submission overdue"
                    );
                }
            }
        }
    }
}
