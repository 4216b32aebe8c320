// Position lifecycle manager
//
// Owns the position map. Entries and exits are dispatched to the executor on
// spawned tasks; each resolution comes back by value as an `ExecutionReport`
// on the channel returned from `new`, and `apply_report` folds it into the
// position. A position never has more than one exit in flight.
//
// An exit that times out stays in flight: its signatures are kept on the
// position and `reconcile_unresolved` settles it once the chain says it
// landed or failed.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::market::PriceAggregator;
use super::position::{
    ExitDecision, ExitPlan, ExitReason, PendingExit, Position, PositionStatus, UnresolvedExit,
};
use super::scorer::TokenSnapshot;
use crate::chain::{
    IntentKind, SignatureStatus, SubmissionResult, TradeExecutor, TradeIntent, Urgency,
};
use crate::data::{TradeHistory, TradeRecord};
use crate::error::ExecutionError;

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// SOL spent per entry
    pub position_size_sol: f64,
    pub slippage_bps: u64,
    /// Slippage allowed on rug-pull exits
    pub emergency_slippage_bps: u64,
    pub min_liquidity_usd: f64,
    /// Max distance between detector price and market median at entry
    pub max_entry_deviation_bps: u64,
    pub exit_plan: ExitPlan,
    pub tick_interval: Duration,
    pub max_exit_failures: u32,
    /// A timed-out exit with no on-chain status after this long has expired
    /// and counts as failed
    pub unresolved_exit_expiry: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            position_size_sol: 0.1,
            slippage_bps: 300,
            emergency_slippage_bps: 5_000,
            min_liquidity_usd: 10_000.0,
            max_entry_deviation_bps: 1_000,
            exit_plan: ExitPlan::default(),
            tick_interval: Duration::from_secs(2),
            max_exit_failures: 5,
            unresolved_exit_expiry: Duration::from_secs(90),
        }
    }
}

enum ExitSettlement {
    Sold { price: Option<f64> },
    Failed { kind: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub enum ReportKind {
    Entry {
        quoted_price: f64,
        amount_sol: f64,
    },
    Exit {
        reason: ExitReason,
        token_amount: f64,
        price_hint: Option<f64>,
    },
}

/// A resolved submission handed back to the lifecycle manager
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub token_id: String,
    pub kind: ReportKind,
    pub result: SubmissionResult,
}

pub struct LifecycleManager {
    positions: DashMap<String, Position>,
    executor: Arc<dyn TradeExecutor>,
    market: Arc<PriceAggregator>,
    history: Option<Arc<dyn TradeHistory>>,
    config: LifecycleConfig,
    reports: mpsc::UnboundedSender<ExecutionReport>,
    in_flight: Arc<AtomicUsize>,
    cancel: CancellationToken,
}

impl LifecycleManager {
    pub fn new(
        executor: Arc<dyn TradeExecutor>,
        market: Arc<PriceAggregator>,
        history: Option<Arc<dyn TradeHistory>>,
        config: LifecycleConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ExecutionReport>) {
        let (reports, receiver) = mpsc::unbounded_channel();
        let manager = Self {
            positions: DashMap::new(),
            executor,
            market,
            history,
            config,
            reports,
            in_flight: Arc::new(AtomicUsize::new(0)),
            cancel: CancellationToken::new(),
        };
        (manager, receiver)
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Copy of one position
    pub fn position(&self, token_id: &str) -> Option<Position> {
        self.positions.get(token_id).map(|p| p.value().clone())
    }

    /// Copies of all tracked positions
    pub fn positions_snapshot(&self) -> Vec<Position> {
        self.positions.iter().map(|p| p.value().clone()).collect()
    }

    pub fn position_count(&self) -> usize {
        self.positions.len()
    }

    /// Submissions dispatched whose report has not been sent yet
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Abandon every dispatched submission
    pub fn cancel_submissions(&self) {
        self.cancel.cancel();
    }

    /// Validate the candidate and dispatch an entry. Returns `false` when
    /// the token already has a position.
    pub async fn open_position(&self, token: &TokenSnapshot) -> Result<bool, ExecutionError> {
        if self.positions.contains_key(&token.token_id) {
            debug!(token = %token.token_id, "Position already tracked, skipping entry");
            return Ok(false);
        }

        let liquidity = self
            .market
            .liquidity(&token.token_id)
            .await
            .unwrap_or(token.liquidity_usd);
        if liquidity < self.config.min_liquidity_usd {
            return Err(ExecutionError::InsufficientLiquidity {
                token_id: token.token_id.clone(),
                available_usd: liquidity,
                required_usd: self.config.min_liquidity_usd,
            });
        }

        let observed = self.market.price(&token.token_id).await;
        if let Some(observed) = observed {
            if token.price > 0.0 {
                let deviation_bps = ((observed - token.price).abs() / token.price) * 10_000.0;
                if deviation_bps > self.config.max_entry_deviation_bps as f64 {
                    return Err(ExecutionError::SlippageExceeded {
                        token_id: token.token_id.clone(),
                        expected: token.price,
                        observed,
                        max_bps: self.config.max_entry_deviation_bps,
                    });
                }
            }
        }

        let quoted_price = if token.price > 0.0 {
            token.price
        } else {
            observed.unwrap_or(0.0)
        };
        if quoted_price <= 0.0 {
            return Err(ExecutionError::Build {
                token_id: token.token_id.clone(),
                reason: "no usable price quote".to_string(),
            });
        }

        let size = self.config.position_size_sol;
        match self.positions.entry(token.token_id.clone()) {
            Entry::Occupied(_) => return Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(Position::opening(
                    &token.token_id,
                    &token.symbol,
                    quoted_price,
                    size,
                ));
            }
        }

        info!(
            token = %token.token_id,
            symbol = %token.symbol,
            size_sol = size,
            quoted_price,
            liquidity_usd = liquidity,
            "Opening position"
        );

        let intent = TradeIntent::entry(&token.token_id, size, self.config.slippage_bps);
        self.dispatch(
            intent,
            Urgency::Sniping,
            ReportKind::Entry {
                quoted_price,
                amount_sol: size,
            },
        );
        Ok(true)
    }

    /// One monitoring pass over every active position. Returns the number of
    /// exits dispatched.
    pub async fn tick(&self) -> usize {
        let now = Instant::now();
        let candidates: Vec<String> = self
            .positions
            .iter()
            .filter(|p| p.status.is_active() && p.pending_exit.is_none())
            .map(|p| p.key().clone())
            .collect();

        if candidates.is_empty() {
            return 0;
        }

        let prices = join_all(candidates.iter().map(|token| self.market.price(token))).await;

        let mut dispatched = 0;
        for (token_id, price) in candidates.iter().zip(prices) {
            let exit = {
                let Some(mut position) = self.positions.get_mut(token_id) else {
                    continue;
                };
                if let Some(price) = price {
                    position.last_price = Some(price);
                }

                let decision = if position.rug_signalled
                    && position.status.is_active()
                    && position.pending_exit.is_none()
                {
                    Some(ExitDecision::full(ExitReason::RugPull))
                } else if position.can_dispatch_exit() {
                    position.evaluate(price, now)
                } else {
                    None
                };

                if price.is_none() && decision.is_none() {
                    debug!(token = %token_id, "No price available this tick");
                }

                decision.map(|d| {
                    let pending = position.begin_exit(&d, now);
                    (pending, position.profit_loss_pct(price.unwrap_or(position.entry_price)))
                })
            };

            if let Some((pending, pnl_pct)) = exit {
                self.dispatch_exit(token_id, pending, price, pnl_pct);
                dispatched += 1;
            }
        }
        dispatched
    }

    /// Mark the token as rugged and exit it urgently. Returns whether a
    /// position was found.
    pub fn signal_rug_pull(&self, token_id: &str) -> bool {
        let now = Instant::now();
        let exit = {
            let Some(mut position) = self.positions.get_mut(token_id) else {
                return false;
            };
            position.rug_signalled = true;
            if position.status.is_active() && position.pending_exit.is_none() {
                let pending = position.begin_exit(&ExitDecision::full(ExitReason::RugPull), now);
                let last = position.last_price;
                let pnl = last.map_or(0.0, |p| position.profit_loss_pct(p));
                Some((pending, last, pnl))
            } else {
                None
            }
        };

        warn!(token = %token_id, dispatching = exit.is_some(), "Rug pull signalled");
        if let Some((pending, last, pnl)) = exit {
            self.dispatch_exit(token_id, pending, last, pnl);
        }
        true
    }

    /// Fold a resolved submission into its position. Returns the position's
    /// status afterwards, or `None` if it is no longer tracked.
    pub async fn apply_report(&self, report: ExecutionReport) -> Option<PositionStatus> {
        match report.kind {
            ReportKind::Entry {
                quoted_price,
                amount_sol,
            } => {
                self.apply_entry(&report.token_id, quoted_price, amount_sol, &report.result)
                    .await
            }
            ReportKind::Exit {
                reason,
                token_amount,
                price_hint,
            } => {
                self.apply_exit(&report.token_id, reason, token_amount, price_hint, &report.result)
                    .await
            }
        }
    }

    async fn apply_entry(
        &self,
        token_id: &str,
        quoted_price: f64,
        amount_sol: f64,
        result: &SubmissionResult,
    ) -> Option<PositionStatus> {
        if result.success {
            let entry_price = self
                .market
                .price(token_id)
                .await
                .filter(|p| *p > 0.0)
                .unwrap_or(quoted_price);
            self.record(TradeRecord::from_submission(
                token_id,
                IntentKind::Entry,
                "score",
                amount_sol,
                Some(entry_price),
                result,
            ));

            let (status, rugged) = {
                let mut position = self.positions.get_mut(token_id)?;
                if let Err(e) =
                    position.confirm_entry(entry_price, result.signature.clone(), &self.config.exit_plan)
                {
                    error!(token = %token_id, error = %e, "Entry confirmation out of order");
                }
                (position.status, position.rug_signalled)
            };

            info!(
                token = %token_id,
                entry_price,
                signature = result.signature.as_deref().unwrap_or(""),
                tier = ?result.tier,
                "Position open"
            );

            if rugged {
                self.signal_rug_pull(token_id);
            }
            return Some(status);
        }

        self.record(TradeRecord::from_submission(
            token_id,
            IntentKind::Entry,
            "score",
            amount_sol,
            None,
            result,
        ));

        if let Some(mut position) = self.positions.get_mut(token_id) {
            if let Err(e) = position.transition(PositionStatus::Failed) {
                error!(token = %token_id, error = %e, "Entry failure out of order");
            }
        }
        self.positions.remove(token_id);

        let kind = result.error.as_ref().map_or("unknown", |e| e.kind());
        let message = result.error.as_ref().map(|e| e.to_string()).unwrap_or_default();
        if result.is_unknown_outcome() {
            error!(token = %token_id, kind, error = %message, "Entry outcome unknown, tokens may be held untracked");
        } else {
            warn!(token = %token_id, kind, error = %message, "Entry failed");
        }
        Some(PositionStatus::Failed)
    }

    async fn apply_exit(
        &self,
        token_id: &str,
        reason: ExitReason,
        token_amount: f64,
        price_hint: Option<f64>,
        result: &SubmissionResult,
    ) -> Option<PositionStatus> {
        let price = if result.success {
            self.market
                .price(token_id)
                .await
                .or(price_hint)
                .or_else(|| self.positions.get(token_id).and_then(|p| p.last_price))
        } else {
            price_hint
        };

        self.record(TradeRecord::from_submission(
            token_id,
            IntentKind::Exit,
            reason.to_string(),
            token_amount,
            price,
            result,
        ));

        let unresolved = result.unresolved_signatures();
        if result.is_unknown_outcome() && !unresolved.is_empty() {
            let mut position = self.positions.get_mut(token_id)?;
            if position.pending_exit.is_some() {
                warn!(
                    token = %token_id,
                    %reason,
                    signatures = ?unresolved,
                    "Exit outcome unknown, holding until its status resolves"
                );
                position.hold_unresolved(unresolved, Instant::now(), price_hint);
                return Some(position.status);
            }
        }

        let settlement = if result.success {
            ExitSettlement::Sold { price }
        } else {
            ExitSettlement::Failed {
                kind: result.error.as_ref().map_or("unknown", |e| e.kind()),
                message: result.error.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            }
        };
        self.settle_exit(token_id, reason, token_amount, settlement)
    }

    /// Poll the chain for every exit whose outcome was unknown and settle the
    /// ones that resolved. A confirmed signature completes the exit; the exit
    /// fails once every signature is rejected or `unresolved_exit_expiry`
    /// passes with no status. Returns the number settled.
    pub async fn reconcile_unresolved(&self) -> usize {
        let waiting: Vec<(String, PendingExit, UnresolvedExit)> = self
            .positions
            .iter()
            .filter_map(|p| match (&p.pending_exit, &p.unresolved_exit) {
                (Some(pending), Some(unresolved)) => {
                    Some((p.key().clone(), *pending, unresolved.clone()))
                }
                _ => None,
            })
            .collect();

        let mut settled = 0;
        for (token_id, pending, unresolved) in waiting {
            let statuses = join_all(
                unresolved
                    .signatures
                    .iter()
                    .map(|signature| self.executor.signature_status(signature)),
            )
            .await;

            let mut landed = None;
            let mut rejections = Vec::new();
            for (signature, status) in unresolved.signatures.iter().zip(statuses) {
                match status {
                    Ok(SignatureStatus::Confirmed { slot }) => {
                        landed = Some((signature.clone(), slot));
                        break;
                    }
                    Ok(SignatureStatus::Failed(reason)) => rejections.push(reason),
                    Ok(SignatureStatus::Pending) => {}
                    Err(e) => debug!(token = %token_id, %signature, error = %e, "Status check failed"),
                }
            }

            let elapsed = pending.dispatched_at.elapsed();
            let (settlement, outcome) = if let Some((signature, slot)) = landed {
                let price = self.market.price(&token_id).await.or(unresolved.price_hint);
                info!(token = %token_id, %signature, slot, "Unresolved exit landed");
                let outcome = SubmissionResult {
                    success: true,
                    signature: Some(signature),
                    error: None,
                    tier: None,
                    details: Vec::new(),
                    elapsed,
                };
                (ExitSettlement::Sold { price }, outcome)
            } else {
                let error = if rejections.len() == unresolved.signatures.len() {
                    ExecutionError::TransactionFailed {
                        signature: unresolved.signatures.join(","),
                        reason: rejections.join("; "),
                    }
                } else if unresolved.since.elapsed() >= self.config.unresolved_exit_expiry {
                    ExecutionError::TransactionFailed {
                        signature: unresolved.signatures.join(","),
                        reason: format!(
                            "no on-chain status after {}ms, transaction expired",
                            unresolved.since.elapsed().as_millis()
                        ),
                    }
                } else {
                    continue;
                };
                let settlement = ExitSettlement::Failed {
                    kind: error.kind(),
                    message: error.to_string(),
                };
                (settlement, SubmissionResult::failed(error, Vec::new(), elapsed))
            };

            let price = match &settlement {
                ExitSettlement::Sold { price } => *price,
                ExitSettlement::Failed { .. } => unresolved.price_hint,
            };
            self.record(TradeRecord::from_submission(
                &token_id,
                IntentKind::Exit,
                pending.reason.to_string(),
                pending.token_amount,
                price,
                &outcome,
            ));
            self.settle_exit(&token_id, pending.reason, pending.token_amount, settlement);
            settled += 1;
        }
        settled
    }

    /// Exits whose signatures are still awaiting an on-chain status
    pub fn unresolved_exits(&self) -> Vec<(String, UnresolvedExit)> {
        self.positions
            .iter()
            .filter_map(|p| p.unresolved_exit.clone().map(|u| (p.key().clone(), u)))
            .collect()
    }

    fn settle_exit(
        &self,
        token_id: &str,
        reason: ExitReason,
        token_amount: f64,
        settlement: ExitSettlement,
    ) -> Option<PositionStatus> {
        let (status, follow_up_rug, summary, sold_at) = {
            let mut position = self.positions.get_mut(token_id)?;
            if position.pending_exit.is_none() {
                warn!(token = %token_id, %reason, "Exit resolved with nothing in flight");
                return Some(position.status);
            }

            let (status, sold_at) = match settlement {
                ExitSettlement::Sold { price } => {
                    let fill_price = price.or(position.last_price);
                    if fill_price.is_none() {
                        warn!(token = %token_id, %reason, "Exit confirmed with no price from any source");
                    }
                    let status = match position.complete_exit(token_amount, fill_price.unwrap_or(0.0)) {
                        Ok(status) => status,
                        Err(e) => {
                            error!(token = %token_id, error = %e, "Exit confirmation out of order");
                            position.status
                        }
                    };
                    (status, Some(fill_price))
                }
                ExitSettlement::Failed { kind, message } => {
                    let failures = position.fail_exit();
                    if failures >= self.config.max_exit_failures {
                        if let Err(e) = position.transition(PositionStatus::Failed) {
                            error!(token = %token_id, error = %e, "Exit failure out of order");
                        }
                        error!(
                            token = %token_id,
                            %reason,
                            failures,
                            tokens_held = position.tokens_held,
                            kind,
                            error = %message,
                            "Exit failed repeatedly, giving up on position"
                        );
                    } else {
                        warn!(
                            token = %token_id,
                            %reason,
                            failures,
                            kind,
                            error = %message,
                            "Exit failed, will retry on a later tick"
                        );
                    }
                    (position.status, None)
                }
            };

            let follow_up = position.rug_signalled
                && reason != ExitReason::RugPull
                && position.status.is_active();
            let summary = (position.exited_pct, position.realized_sol - position.amount_spent);
            (status, follow_up, summary, sold_at)
        };

        if let Some(price) = sold_at {
            info!(
                token = %token_id,
                %reason,
                sold = token_amount,
                price = price.unwrap_or(0.0),
                exited_pct = format!("{:.1}", summary.0),
                %status,
                "Exit confirmed"
            );
        }

        if status.is_terminal() {
            self.positions.remove(token_id);
            info!(token = %token_id, %status, pnl_sol = format!("{:.6}", summary.1), "Position removed");
        } else if follow_up_rug {
            self.signal_rug_pull(token_id);
        }

        Some(status)
    }

    fn dispatch_exit(&self, token_id: &str, pending: PendingExit, price: Option<f64>, pnl_pct: f64) {
        let rug = pending.reason == ExitReason::RugPull;
        let (urgency, slippage) = if rug {
            (Urgency::Urgent, self.config.emergency_slippage_bps)
        } else {
            (Urgency::High, self.config.slippage_bps)
        };

        let mut intent = TradeIntent::exit(token_id, pending.token_amount, slippage);
        if rug {
            intent = intent.emergency();
        }

        info!(
            token = %token_id,
            reason = %pending.reason,
            fraction = pending.fraction,
            token_amount = pending.token_amount,
            pnl_pct = format!("{:.1}", pnl_pct),
            %urgency,
            "Dispatching exit"
        );

        self.dispatch(
            intent,
            urgency,
            ReportKind::Exit {
                reason: pending.reason,
                token_amount: pending.token_amount,
                price_hint: price,
            },
        );
    }

    fn dispatch(&self, intent: TradeIntent, urgency: Urgency, kind: ReportKind) {
        let executor = Arc::clone(&self.executor);
        let reports = self.reports.clone();
        let in_flight = Arc::clone(&self.in_flight);
        let cancel = self.cancel.clone();

        in_flight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            tokio::select! {
                result = executor.submit(&intent, urgency) => {
                    let report = ExecutionReport {
                        token_id: intent.token_id.clone(),
                        kind,
                        result,
                    };
                    if reports.send(report).is_err() {
                        warn!(token = %intent.token_id, "Report channel closed, submission result dropped");
                    }
                }
                _ = cancel.cancelled() => {
                    warn!(token = %intent.token_id, kind = %intent.kind, "Submission abandoned at shutdown");
                }
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }

    fn record(&self, record: TradeRecord) {
        if let Some(history) = &self.history {
            history.record(record);
        }
    }
}
