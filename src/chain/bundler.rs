// Transaction bundler with MEV-protection fallback
//
// Submission runs down an ordered fallback chain until one tier succeeds:
// 1. Atomic bundle through the protected relay (if configured and enabled)
// 2. Parallel submission of every transaction, success if any confirms
// 3. Sequential submission, stopping at the first failure
//
// Each tier returns an explicit Result; a failure moves on to the next tier.
// Retries always re-send the same signed bytes, so a transaction that
// already landed is never paid for twice.
//
// The bundler owns the pending-submission map and enforces at most one
// in-flight exit per token.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use super::fee_optimizer::FeeOptimizer;
use super::relay::{BundleRelay, BundleStatus};
use super::rpc_pool::RpcPool;
use super::types::{
    IntentKind, SignatureStatus, SignedTransaction, SwapBuilder, TradeIntent, Urgency, Wallet,
};
use crate::error::ExecutionError;

/// Configuration for transaction submission
#[derive(Debug, Clone)]
pub struct BundlerConfig {
    pub use_relay: bool,
    pub parallel_enabled: bool,
    pub send_retries: u32,
    pub send_retry_delay: Duration,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    pub bundle_timeout: Duration,
    pub bundle_poll_interval: Duration,
    /// Fee multiplier for an optional backup entry transaction
    pub entry_backup_fee_multiplier: Option<f64>,
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self {
            use_relay: true,
            parallel_enabled: true,
            send_retries: 3,
            send_retry_delay: Duration::from_millis(200),
            confirmation_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(400),
            bundle_timeout: Duration::from_secs(60),
            bundle_poll_interval: Duration::from_secs(1),
            entry_backup_fee_multiplier: None,
        }
    }
}

impl BundlerConfig {
    /// Upper bound on how long one submission can stay pending
    pub fn submission_budget(&self) -> Duration {
        let per_tx = self.confirmation_timeout + self.send_retry_delay * self.send_retries;
        // bundle, then parallel, then sequential over at most two transactions
        self.bundle_timeout + per_tx * 3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionTier {
    AtomicBundle,
    Parallel,
    Sequential,
}

impl fmt::Display for SubmissionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionTier::AtomicBundle => write!(f, "atomic_bundle"),
            SubmissionTier::Parallel => write!(f, "parallel"),
            SubmissionTier::Sequential => write!(f, "sequential"),
        }
    }
}

/// Ordered fallback chain for the given capabilities
pub fn fallback_chain(has_relay: bool, use_relay: bool, parallel_enabled: bool) -> Vec<SubmissionTier> {
    let mut tiers = Vec::with_capacity(3);
    if has_relay && use_relay {
        tiers.push(SubmissionTier::AtomicBundle);
    }
    if parallel_enabled {
        tiers.push(SubmissionTier::Parallel);
    }
    tiers.push(SubmissionTier::Sequential);
    tiers
}

/// Outcome of one transaction within one tier
#[derive(Debug, Clone, PartialEq)]
pub enum TxOutcome {
    Confirmed { slot: u64 },
    Rejected,
    TimedOut,
    SendFailed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct TxDetail {
    pub signature: String,
    pub priority_fee: u64,
    pub tier: SubmissionTier,
    pub outcome: TxOutcome,
    pub send_attempts: u32,
    pub error: Option<ExecutionError>,
}

impl TxDetail {
    pub fn is_confirmed(&self) -> bool {
        matches!(self.outcome, TxOutcome::Confirmed { .. })
    }
}

/// Result of `submit`, handed back to the caller by value
#[derive(Debug, Clone)]
pub struct SubmissionResult {
    pub success: bool,
    pub signature: Option<String>,
    pub error: Option<ExecutionError>,
    pub tier: Option<SubmissionTier>,
    pub details: Vec<TxDetail>,
    pub elapsed: Duration,
}

impl SubmissionResult {
    pub fn failed(error: ExecutionError, details: Vec<TxDetail>, elapsed: Duration) -> Self {
        Self {
            success: false,
            signature: None,
            error: Some(error),
            tier: None,
            details,
            elapsed,
        }
    }

    /// The submission failed but may still land on-chain
    pub fn is_unknown_outcome(&self) -> bool {
        !self.success && self.error.as_ref().map_or(false, |e| e.is_unknown_outcome())
    }

    /// Signatures that timed out and may still land, deduplicated across tiers
    pub fn unresolved_signatures(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.details
            .iter()
            .filter(|d| d.outcome == TxOutcome::TimedOut)
            .filter(|d| seen.insert(d.signature.clone()))
            .map(|d| d.signature.clone())
            .collect()
    }

    /// Slot of the first confirmed transaction
    pub fn confirmed_slot(&self) -> Option<u64> {
        self.details.iter().find_map(|d| match d.outcome {
            TxOutcome::Confirmed { slot } => Some(slot),
            _ => None,
        })
    }
}

/// Anything that can execute a trade intent end to end
#[async_trait]
pub trait TradeExecutor: Send + Sync {
    async fn submit(&self, intent: &TradeIntent, urgency: Urgency) -> SubmissionResult;

    /// On-chain status of a transaction sent by an earlier `submit`
    async fn signature_status(&self, signature: &str) -> Result<SignatureStatus, ExecutionError>;
}

/// A submission between `submit` and its resolution
#[derive(Debug, Clone)]
pub struct PendingSubmission {
    pub id: u64,
    pub kind: IntentKind,
    pub token_id: String,
    pub amount: f64,
    pub created_at: Instant,
    pub timeout: Duration,
    pub retry_count: u32,
}

impl PendingSubmission {
    pub fn is_overdue(&self) -> bool {
        self.created_at.elapsed() > self.timeout
    }
}

struct TierSuccess {
    signature: String,
    details: Vec<TxDetail>,
}

struct TierFailure {
    error: ExecutionError,
    details: Vec<TxDetail>,
}

type TierResult = Result<TierSuccess, TierFailure>;

/// Removes the pending entry (and exit guard) when the submission resolves
struct PendingGuard<'a> {
    bundler: &'a TransactionBundler,
    id: u64,
    kind: IntentKind,
    token_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.bundler.pending.remove(&self.id);
        if self.kind == IntentKind::Exit {
            let id = self.id;
            self.bundler
                .exit_guards
                .remove_if(&self.token_id, |_, pending_id| *pending_id == id);
        }
    }
}

/// Builds, signs and submits transactions for trade intents
pub struct TransactionBundler {
    pool: Arc<RpcPool>,
    fees: Arc<FeeOptimizer>,
    builder: Arc<dyn SwapBuilder>,
    wallet: Arc<dyn Wallet>,
    relay: Option<Arc<dyn BundleRelay>>,
    config: BundlerConfig,
    pending: DashMap<u64, PendingSubmission>,
    exit_guards: DashMap<String, u64>,
    next_id: AtomicU64,
}

impl TransactionBundler {
    pub fn new(
        pool: Arc<RpcPool>,
        fees: Arc<FeeOptimizer>,
        builder: Arc<dyn SwapBuilder>,
        wallet: Arc<dyn Wallet>,
        relay: Option<Arc<dyn BundleRelay>>,
        config: BundlerConfig,
    ) -> Self {
        info!(
            relay = relay.as_ref().map(|r| r.name()).unwrap_or("none"),
            use_relay = config.use_relay,
            parallel = config.parallel_enabled,
            send_retries = config.send_retries,
            confirmation_timeout_ms = config.confirmation_timeout.as_millis() as u64,
            "Initialized TransactionBundler"
        );

        Self {
            pool,
            fees,
            builder,
            wallet,
            relay,
            config,
            pending: DashMap::new(),
            exit_guards: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &BundlerConfig {
        &self.config
    }

    pub fn tiers(&self) -> Vec<SubmissionTier> {
        fallback_chain(
            self.relay.is_some(),
            self.config.use_relay,
            self.config.parallel_enabled,
        )
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Cloned view of all pending submissions
    pub fn pending_snapshot(&self) -> Vec<PendingSubmission> {
        self.pending.iter().map(|e| e.value().clone()).collect()
    }

    pub fn overdue_submissions(&self) -> Vec<PendingSubmission> {
        self.pending
            .iter()
            .filter(|e| e.value().is_overdue())
            .map(|e| e.value().clone())
            .collect()
    }

    /// Drop every pending submission; each is logged as an unknown outcome
    pub fn force_clear(&self) -> Vec<PendingSubmission> {
        let ids: Vec<u64> = self.pending.iter().map(|e| *e.key()).collect();
        let mut cleared = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, submission)) = self.pending.remove(&id) {
                error!(
                    id = submission.id,
                    kind = %submission.kind,
                    token = %submission.token_id,
                    age_ms = submission.created_at.elapsed().as_millis() as u64,
                    "Force-cleared pending submission: unknown outcome"
                );
                cleared.push(submission);
            }
        }
        self.exit_guards.clear();
        cleared
    }

    fn register(&self, intent: &TradeIntent) -> Result<PendingGuard<'_>, ExecutionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        if intent.kind == IntentKind::Exit {
            match self.exit_guards.entry(intent.token_id.clone()) {
                Entry::Occupied(existing) => {
                    return Err(ExecutionError::ExitInFlight {
                        token_id: intent.token_id.clone(),
                        pending_id: *existing.get(),
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(id);
                }
            }
        }

        self.pending.insert(
            id,
            PendingSubmission {
                id,
                kind: intent.kind,
                token_id: intent.token_id.clone(),
                amount: intent.amount,
                created_at: Instant::now(),
                timeout: self.config.submission_budget(),
                retry_count: 0,
            },
        );

        Ok(PendingGuard {
            bundler: self,
            id,
            kind: intent.kind,
            token_id: intent.token_id.clone(),
        })
    }

    fn bump_retry(&self, pending_id: u64) {
        if let Some(mut pending) = self.pending.get_mut(&pending_id) {
            pending.retry_count += 1;
        }
    }

    /// Build and submit the transaction set for `intent`
    pub async fn submit(&self, intent: &TradeIntent, urgency: Urgency) -> SubmissionResult {
        let started = Instant::now();

        let guard = match self.register(intent) {
            Ok(guard) => guard,
            Err(e) => {
                warn!(token = %intent.token_id, error = %e, "Refusing duplicate exit submission");
                return SubmissionResult::failed(e, Vec::new(), started.elapsed());
            }
        };

        info!(
            id = guard.id,
            kind = %intent.kind,
            token = %intent.token_id,
            amount = intent.amount,
            %urgency,
            emergency = intent.emergency,
            "Submitting trade intent"
        );

        let txs = match self.build_transactions(intent, urgency).await {
            Ok(txs) => txs,
            Err(e) => {
                error!(token = %intent.token_id, error = %e, "Failed to build transactions");
                return SubmissionResult::failed(e, Vec::new(), started.elapsed());
            }
        };

        let mut details: Vec<TxDetail> = Vec::new();
        let mut last_error: Option<ExecutionError> = None;

        for tier in self.tiers() {
            let result = match tier {
                SubmissionTier::AtomicBundle => self.submit_bundle(&txs).await,
                SubmissionTier::Parallel => self.submit_parallel(&txs, guard.id).await,
                SubmissionTier::Sequential => {
                    let rejected: HashSet<String> = details
                        .iter()
                        .filter(|d| d.outcome == TxOutcome::Rejected)
                        .map(|d| d.signature.clone())
                        .collect();
                    self.submit_sequential(&txs, guard.id, &rejected).await
                }
            };

            match result {
                Ok(success) => {
                    details.extend(success.details);
                    info!(
                        token = %intent.token_id,
                        signature = %success.signature,
                        %tier,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Submission confirmed"
                    );
                    return SubmissionResult {
                        success: true,
                        signature: Some(success.signature),
                        error: None,
                        tier: Some(tier),
                        details,
                        elapsed: started.elapsed(),
                    };
                }
                Err(failure) => {
                    warn!(
                        token = %intent.token_id,
                        %tier,
                        kind = failure.error.kind(),
                        error = %failure.error,
                        "Submission tier failed, falling through"
                    );
                    details.extend(failure.details);
                    last_error = Some(failure.error);
                }
            }
        }

        let error = preferred_error(&details).or(last_error).unwrap_or_else(|| {
            ExecutionError::TransactionFailed {
                signature: txs.first().map(|t| t.signature.clone()).unwrap_or_default(),
                reason: "all submission tiers exhausted".to_string(),
            }
        });

        error!(
            token = %intent.token_id,
            kind = error.kind(),
            error = %error,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "All submission tiers exhausted"
        );

        SubmissionResult::failed(error, details, started.elapsed())
    }

    /// Primary transaction plus an optional higher-fee backup for entries
    async fn build_transactions(
        &self,
        intent: &TradeIntent,
        urgency: Urgency,
    ) -> Result<Vec<SignedTransaction>, ExecutionError> {
        let fee = self.fees.optimal_fee(urgency).await;
        let mut fees = vec![fee];
        if intent.kind == IntentKind::Entry {
            if let Some(multiplier) = self.config.entry_backup_fee_multiplier {
                fees.push(((fee as f64) * multiplier).round() as u64);
            }
        }

        let payer = self.wallet.address();
        let mut txs = Vec::with_capacity(fees.len());
        for fee in fees {
            let unsigned = self.builder.build(intent, fee, &payer).await?;
            let signed = self.wallet.sign(&unsigned)?;
            debug!(token = %intent.token_id, signature = %signed.signature, fee, "Signed transaction");
            txs.push(signed);
        }
        Ok(txs)
    }

    async fn submit_bundle(&self, txs: &[SignedTransaction]) -> TierResult {
        let Some(relay) = self.relay.as_ref() else {
            return Err(TierFailure {
                error: ExecutionError::BundleSubmission {
                    relay: "none".to_string(),
                    bundle_id: None,
                    reason: "no relay configured".to_string(),
                },
                details: Vec::new(),
            });
        };

        let bundle_details = |outcome: TxOutcome, error: Option<ExecutionError>| -> Vec<TxDetail> {
            txs.iter()
                .map(|tx| TxDetail {
                    signature: tx.signature.clone(),
                    priority_fee: tx.priority_fee,
                    tier: SubmissionTier::AtomicBundle,
                    outcome: outcome.clone(),
                    send_attempts: 1,
                    error: error.clone(),
                })
                .collect()
        };

        let bundle_id = match relay.send_bundle(txs).await {
            Ok(id) => id,
            Err(e) => {
                return Err(TierFailure {
                    details: bundle_details(TxOutcome::SendFailed, Some(e.clone())),
                    error: e,
                })
            }
        };
        debug!(relay = relay.name(), %bundle_id, txs = txs.len(), "Bundle accepted by relay");

        let deadline = Instant::now() + self.config.bundle_timeout;
        loop {
            match relay.bundle_status(&bundle_id).await {
                Ok(BundleStatus::Confirmed { slot }) => {
                    let signature = txs.first().map(|t| t.signature.clone()).unwrap_or_default();
                    return Ok(TierSuccess {
                        signature,
                        details: bundle_details(TxOutcome::Confirmed { slot }, None),
                    });
                }
                Ok(BundleStatus::Rejected(reason)) => {
                    let error = ExecutionError::BundleSubmission {
                        relay: relay.name().to_string(),
                        bundle_id: Some(bundle_id.clone()),
                        reason,
                    };
                    return Err(TierFailure {
                        details: bundle_details(TxOutcome::Rejected, Some(error.clone())),
                        error,
                    });
                }
                Ok(BundleStatus::Pending) => {}
                Err(e) => {
                    return Err(TierFailure {
                        details: bundle_details(TxOutcome::TimedOut, Some(e.clone())),
                        error: e,
                    });
                }
            }

            if Instant::now() >= deadline {
                let error = ExecutionError::BundleSubmission {
                    relay: relay.name().to_string(),
                    bundle_id: Some(bundle_id.clone()),
                    reason: format!(
                        "not confirmed within {}ms",
                        self.config.bundle_timeout.as_millis()
                    ),
                };
                return Err(TierFailure {
                    details: bundle_details(TxOutcome::TimedOut, Some(error.clone())),
                    error,
                });
            }
            sleep(self.config.bundle_poll_interval).await;
        }
    }

    /// Dispatch every transaction, then join; success if any confirmed
    async fn submit_parallel(&self, txs: &[SignedTransaction], pending_id: u64) -> TierResult {
        let futures = txs
            .iter()
            .map(|tx| self.submit_single(tx, pending_id, SubmissionTier::Parallel));
        let details = join_all(futures).await;

        match details.iter().find(|d| d.is_confirmed()) {
            Some(confirmed) => Ok(TierSuccess {
                signature: confirmed.signature.clone(),
                details,
            }),
            None => Err(TierFailure {
                error: tier_error(&details),
                details,
            }),
        }
    }

    /// One at a time, stopping at the first failure
    async fn submit_sequential(
        &self,
        txs: &[SignedTransaction],
        pending_id: u64,
        already_rejected: &HashSet<String>,
    ) -> TierResult {
        let mut details = Vec::with_capacity(txs.len());
        let mut confirmed: Option<String> = None;

        for tx in txs {
            if already_rejected.contains(&tx.signature) {
                details.push(TxDetail {
                    signature: tx.signature.clone(),
                    priority_fee: tx.priority_fee,
                    tier: SubmissionTier::Sequential,
                    outcome: TxOutcome::Skipped,
                    send_attempts: 0,
                    error: None,
                });
                continue;
            }

            let detail = self.submit_single(tx, pending_id, SubmissionTier::Sequential).await;
            let ok = detail.is_confirmed();
            if ok && confirmed.is_none() {
                confirmed = Some(detail.signature.clone());
            }
            details.push(detail);
            if !ok {
                break;
            }
        }

        match confirmed {
            Some(signature) => Ok(TierSuccess { signature, details }),
            None => Err(TierFailure {
                error: tier_error(&details),
                details,
            }),
        }
    }

    /// Send one signed transaction with retries, then wait for confirmation
    async fn submit_single(
        &self,
        tx: &SignedTransaction,
        pending_id: u64,
        tier: SubmissionTier,
    ) -> TxDetail {
        let retries = self.config.send_retries.max(1);
        let mut last_error = None;
        let mut accepted = false;
        let mut attempts = 0;

        for attempt in 1..=retries {
            attempts = attempt;
            if attempt > 1 {
                self.bump_retry(pending_id);
            }

            let result = self
                .pool
                .call("sendTransaction", |client| {
                    let tx = tx.clone();
                    async move { client.send_transaction(&tx).await }
                })
                .await;

            match result {
                Ok(signature) => {
                    if signature != tx.signature {
                        warn!(expected = %tx.signature, returned = %signature, "Node returned unexpected signature");
                    }
                    accepted = true;
                    break;
                }
                Err(e) => {
                    // A rejected send can mean the same bytes already landed
                    if let Ok(SignatureStatus::Confirmed { slot }) = self.fetch_status(&tx.signature).await {
                        return TxDetail {
                            signature: tx.signature.clone(),
                            priority_fee: tx.priority_fee,
                            tier,
                            outcome: TxOutcome::Confirmed { slot },
                            send_attempts: attempt,
                            error: None,
                        };
                    }
                    debug!(signature = %tx.signature, attempt, error = %e, "Send attempt failed");
                    last_error = Some(e);
                    if attempt < retries {
                        sleep(self.config.send_retry_delay).await;
                    }
                }
            }
        }

        if !accepted {
            return TxDetail {
                signature: tx.signature.clone(),
                priority_fee: tx.priority_fee,
                tier,
                outcome: TxOutcome::SendFailed,
                send_attempts: attempts,
                error: last_error,
            };
        }

        let (outcome, error) = match self.await_confirmation(&tx.signature).await {
            Ok(slot) => (TxOutcome::Confirmed { slot }, None),
            Err(e @ ExecutionError::TransactionTimeout { .. }) => (TxOutcome::TimedOut, Some(e)),
            Err(e) => (TxOutcome::Rejected, Some(e)),
        };

        TxDetail {
            signature: tx.signature.clone(),
            priority_fee: tx.priority_fee,
            tier,
            outcome,
            send_attempts: attempts,
            error,
        }
    }

    async fn fetch_status(&self, signature: &str) -> Result<SignatureStatus, ExecutionError> {
        self.pool
            .call("getSignatureStatuses", |client| {
                let signature = signature.to_string();
                async move { client.signature_status(&signature).await }
            })
            .await
    }

    /// Poll until confirmed, rejected, or the confirmation timeout elapses
    async fn await_confirmation(&self, signature: &str) -> Result<u64, ExecutionError> {
        let budget = self.config.confirmation_timeout;
        let poll = async {
            loop {
                match self.fetch_status(signature).await {
                    Ok(SignatureStatus::Confirmed { slot }) => return Ok(slot),
                    Ok(SignatureStatus::Failed(reason)) => {
                        return Err(ExecutionError::TransactionFailed {
                            signature: signature.to_string(),
                            reason,
                        })
                    }
                    Ok(SignatureStatus::Pending) => {}
                    Err(e) => debug!(%signature, error = %e, "Status poll failed"),
                }
                sleep(self.config.poll_interval).await;
            }
        };

        match timeout(budget, poll).await {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::TransactionTimeout {
                signature: signature.to_string(),
                timeout_ms: budget.as_millis() as u64,
            }),
        }
    }
}

#[async_trait]
impl TradeExecutor for TransactionBundler {
    async fn submit(&self, intent: &TradeIntent, urgency: Urgency) -> SubmissionResult {
        TransactionBundler::submit(self, intent, urgency).await
    }

    async fn signature_status(&self, signature: &str) -> Result<SignatureStatus, ExecutionError> {
        self.fetch_status(signature).await
    }
}

/// An unknown outcome outranks a definite failure: the caller must assume it
/// may still land.
fn preferred_error(details: &[TxDetail]) -> Option<ExecutionError> {
    details
        .iter()
        .filter_map(|d| d.error.as_ref())
        .find(|e| e.is_unknown_outcome())
        .cloned()
}

fn tier_error(details: &[TxDetail]) -> ExecutionError {
    preferred_error(details)
        .or_else(|| details.iter().rev().find_map(|d| d.error.clone()))
        .unwrap_or_else(|| ExecutionError::TransactionFailed {
            signature: details.first().map(|d| d.signature.clone()).unwrap_or_default(),
            reason: "no transaction confirmed".to_string(),
        })
}
