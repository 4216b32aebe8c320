// Position state machine
//
//   OPENING -> OPEN | FAILED
//   OPEN -> PARTIALLY_EXITED | CLOSED | FAILED
//   PARTIALLY_EXITED -> PARTIALLY_EXITED | CLOSED | FAILED
//
// Evaluation is pure: `evaluate` returns the exit to take, the lifecycle
// manager dispatches it and applies the confirmed result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

/// Remaining token fraction below which a position counts as fully exited
const DUST_FRACTION: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Opening,
    Open,
    PartiallyExited,
    Closed,
    Failed,
}

impl PositionStatus {
    pub fn can_transition_to(self, next: PositionStatus) -> bool {
        use PositionStatus::*;
        matches!(
            (self, next),
            (Opening, Open)
                | (Opening, Failed)
                | (Open, PartiallyExited)
                | (Open, Closed)
                | (Open, Failed)
                | (PartiallyExited, PartiallyExited)
                | (PartiallyExited, Closed)
                | (PartiallyExited, Failed)
        )
    }

    /// Holding tokens and eligible for exit evaluation
    pub fn is_active(self) -> bool {
        matches!(self, PositionStatus::Open | PositionStatus::PartiallyExited)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PositionStatus::Closed | PositionStatus::Failed)
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PositionStatus::Opening => "OPENING",
            PositionStatus::Open => "OPEN",
            PositionStatus::PartiallyExited => "PARTIALLY_EXITED",
            PositionStatus::Closed => "CLOSED",
            PositionStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid position transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: PositionStatus,
    pub to: PositionStatus,
}

/// Configured ladder step, relative to the entry price
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LadderStep {
    pub multiple: f64,
    /// Percent of the tokens remaining when the rung fires
    pub percentage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitRung {
    pub price: f64,
    pub percentage: f64,
    pub triggered: bool,
}

/// Exit rules applied to every position when its entry confirms
#[derive(Debug, Clone, PartialEq)]
pub struct ExitPlan {
    pub ladder: Vec<LadderStep>,
    /// Stop loss as a fraction of entry price
    pub stop_loss_ratio: f64,
    pub max_holding: Duration,
}

impl Default for ExitPlan {
    fn default() -> Self {
        Self {
            ladder: vec![
                LadderStep {
                    multiple: 2.0,
                    percentage: 25.0,
                },
                LadderStep {
                    multiple: 5.0,
                    percentage: 50.0,
                },
                LadderStep {
                    multiple: 10.0,
                    percentage: 100.0,
                },
            ],
            stop_loss_ratio: 0.7,
            max_holding: Duration::from_secs(4 * 60 * 60),
        }
    }
}

impl ExitPlan {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.stop_loss_ratio > 0.0 && self.stop_loss_ratio < 1.0) {
            return Err(format!(
                "stop loss ratio must be in (0, 1), got {}",
                self.stop_loss_ratio
            ));
        }
        for pair in self.ladder.windows(2) {
            if pair[1].multiple <= pair[0].multiple {
                return Err("take-profit ladder must be strictly increasing".to_string());
            }
        }
        for step in &self.ladder {
            if step.multiple <= 1.0 {
                return Err(format!("take-profit multiple {} is not above entry", step.multiple));
            }
            if !(step.percentage > 0.0 && step.percentage <= 100.0) {
                return Err(format!("take-profit percentage {} out of range", step.percentage));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ExitReason {
    RugPull,
    StopLoss,
    MaxHoldingTime,
    TakeProfit { rung: usize },
}

impl ExitReason {
    pub fn rung(&self) -> Option<usize> {
        match self {
            ExitReason::TakeProfit { rung } => Some(*rung),
            _ => None,
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::RugPull => write!(f, "rug_pull"),
            ExitReason::StopLoss => write!(f, "stop_loss"),
            ExitReason::MaxHoldingTime => write!(f, "max_holding_time"),
            ExitReason::TakeProfit { rung } => write!(f, "take_profit[{}]", rung),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitDecision {
    pub reason: ExitReason,
    /// Share of the currently held tokens to sell, in (0, 1]
    pub fraction: f64,
}

impl ExitDecision {
    pub fn full(reason: ExitReason) -> Self {
        Self {
            reason,
            fraction: 1.0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.fraction >= 1.0
    }
}

/// Exit dispatched and not yet resolved
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingExit {
    pub reason: ExitReason,
    pub fraction: f64,
    pub token_amount: f64,
    pub dispatched_at: Instant,
}

/// Exit whose transactions timed out and may still land. The position keeps
/// its `PendingExit` until the signatures resolve on-chain.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedExit {
    pub signatures: Vec<String>,
    pub since: Instant,
    pub price_hint: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub token_id: String,
    pub symbol: String,
    /// SOL per token; the detector's quote until the entry confirms
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub opened_at: Instant,
    /// SOL
    pub amount_spent: f64,
    pub initial_tokens: f64,
    pub tokens_held: f64,
    pub take_profit_ladder: Vec<TakeProfitRung>,
    pub stop_loss_price: f64,
    pub max_holding_duration: Duration,
    pub status: PositionStatus,
    /// Cumulative percent of the initial tokens sold, at most 100
    pub exited_pct: f64,
    pub realized_sol: f64,
    pub last_price: Option<f64>,
    pub entry_signature: Option<String>,
    pub pending_exit: Option<PendingExit>,
    pub unresolved_exit: Option<UnresolvedExit>,
    pub consecutive_exit_failures: u32,
    pub rug_signalled: bool,
}

impl Position {
    /// New position awaiting its entry confirmation
    pub fn opening(token_id: &str, symbol: &str, quoted_price: f64, amount_spent: f64) -> Self {
        Self {
            token_id: token_id.to_string(),
            symbol: symbol.to_string(),
            entry_price: quoted_price,
            entry_time: Utc::now(),
            opened_at: Instant::now(),
            amount_spent,
            initial_tokens: 0.0,
            tokens_held: 0.0,
            take_profit_ladder: Vec::new(),
            stop_loss_price: 0.0,
            max_holding_duration: Duration::ZERO,
            status: PositionStatus::Opening,
            exited_pct: 0.0,
            realized_sol: 0.0,
            last_price: None,
            entry_signature: None,
            pending_exit: None,
            unresolved_exit: None,
            consecutive_exit_failures: 0,
            rug_signalled: false,
        }
    }

    pub fn transition(&mut self, next: PositionStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Anchor the exit plan on the confirmed entry price: OPENING -> OPEN
    pub fn confirm_entry(
        &mut self,
        entry_price: f64,
        signature: Option<String>,
        plan: &ExitPlan,
    ) -> Result<(), InvalidTransition> {
        self.transition(PositionStatus::Open)?;
        let tokens = if entry_price > 0.0 {
            self.amount_spent / entry_price
        } else {
            0.0
        };

        self.entry_price = entry_price;
        self.entry_time = Utc::now();
        self.opened_at = Instant::now();
        self.initial_tokens = tokens;
        self.tokens_held = tokens;
        self.entry_signature = signature;
        self.stop_loss_price = entry_price * plan.stop_loss_ratio;
        self.max_holding_duration = plan.max_holding;
        self.take_profit_ladder = plan
            .ladder
            .iter()
            .map(|step| TakeProfitRung {
                price: entry_price * step.multiple,
                percentage: step.percentage,
                triggered: false,
            })
            .collect();
        Ok(())
    }

    pub fn profit_loss_pct(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        (price - self.entry_price) / self.entry_price * 100.0
    }

    pub fn holding_time(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.opened_at)
    }

    /// Exit to take at `price` (if known) and `now`, ignoring in-flight state.
    ///
    /// Precedence: stop loss, max holding time, then the lowest untriggered
    /// rung the price has reached.
    pub fn evaluate(&self, price: Option<f64>, now: Instant) -> Option<ExitDecision> {
        if !self.status.is_active() {
            return None;
        }

        if let Some(price) = price {
            if price <= self.stop_loss_price {
                return Some(ExitDecision::full(ExitReason::StopLoss));
            }
        }

        if self.holding_time(now) > self.max_holding_duration {
            return Some(ExitDecision::full(ExitReason::MaxHoldingTime));
        }

        let price = price?;
        self.take_profit_ladder
            .iter()
            .enumerate()
            .find(|(_, rung)| !rung.triggered && price >= rung.price)
            .map(|(idx, rung)| ExitDecision {
                reason: ExitReason::TakeProfit { rung: idx },
                fraction: (rung.percentage / 100.0).clamp(0.0, 1.0),
            })
    }

    pub fn can_dispatch_exit(&self) -> bool {
        self.status.is_active() && self.pending_exit.is_none()
    }

    /// Record a dispatched exit; marks its rung triggered
    pub fn begin_exit(&mut self, decision: &ExitDecision, now: Instant) -> PendingExit {
        if let Some(idx) = decision.reason.rung() {
            if let Some(rung) = self.take_profit_ladder.get_mut(idx) {
                rung.triggered = true;
            }
        }
        let pending = PendingExit {
            reason: decision.reason,
            fraction: decision.fraction,
            token_amount: self.tokens_held * decision.fraction.clamp(0.0, 1.0),
            dispatched_at: now,
        };
        self.pending_exit = Some(pending);
        pending
    }

    /// Apply a confirmed sell. Returns the new status.
    pub fn complete_exit(&mut self, sold: f64, price: f64) -> Result<PositionStatus, InvalidTransition> {
        let pending = self.pending_exit.take();
        let full = pending.map_or(false, |p| p.fraction >= 1.0);

        let sold = sold.min(self.tokens_held).max(0.0);
        self.tokens_held -= sold;
        self.realized_sol += sold * price;
        self.consecutive_exit_failures = 0;
        self.unresolved_exit = None;

        if self.initial_tokens > 0.0 {
            self.exited_pct = ((1.0 - self.tokens_held / self.initial_tokens) * 100.0).clamp(0.0, 100.0);
        }

        let next = if full || self.tokens_held <= self.initial_tokens * DUST_FRACTION {
            self.tokens_held = 0.0;
            self.exited_pct = 100.0;
            PositionStatus::Closed
        } else {
            PositionStatus::PartiallyExited
        };
        self.transition(next)?;
        Ok(next)
    }

    /// Keep the in-flight exit, and its rung, until the timed-out
    /// signatures resolve
    pub fn hold_unresolved(&mut self, signatures: Vec<String>, since: Instant, price_hint: Option<f64>) {
        self.unresolved_exit = Some(UnresolvedExit {
            signatures,
            since,
            price_hint,
        });
    }

    /// Undo a definitely failed exit so the next tick can retry; re-arms its rung
    pub fn fail_exit(&mut self) -> u32 {
        self.unresolved_exit = None;
        if let Some(pending) = self.pending_exit.take() {
            if let Some(idx) = pending.reason.rung() {
                if let Some(rung) = self.take_profit_ladder.get_mut(idx) {
                    rung.triggered = false;
                }
            }
        }
        self.consecutive_exit_failures += 1;
        self.consecutive_exit_failures
    }
}
