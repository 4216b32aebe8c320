use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::chain::{IntentKind, SubmissionResult};

/// Outcome of one resolved entry or exit submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Unix timestamp (milliseconds) when the submission resolved
    pub timestamp: i64,

    pub token_id: String,

    pub side: IntentKind,

    /// Why the trade was made: "score", "stop_loss", "take_profit[0]", ...
    pub reason: String,

    /// Signature of the confirmed (or last attempted) transaction
    pub signature: Option<String>,

    pub success: bool,

    /// SOL for entries, token units for exits
    pub amount: f64,

    /// SOL per token at resolution, if known
    pub price: Option<f64>,

    /// Submission tier that succeeded
    pub tier: Option<String>,

    pub latency_ms: u64,

    /// Machine-readable failure kind
    pub error_kind: Option<String>,

    pub error_message: Option<String>,

    /// The transaction may still land
    #[serde(default)]
    pub unknown_outcome: bool,
}

impl TradeRecord {
    pub fn from_submission(
        token_id: &str,
        side: IntentKind,
        reason: impl Into<String>,
        amount: f64,
        price: Option<f64>,
        result: &SubmissionResult,
    ) -> Self {
        let signature = result
            .signature
            .clone()
            .or_else(|| result.details.last().map(|d| d.signature.clone()));

        Self {
            timestamp: Utc::now().timestamp_millis(),
            token_id: token_id.to_string(),
            side,
            reason: reason.into(),
            signature,
            success: result.success,
            amount,
            price,
            tier: result.tier.map(|t| t.to_string()),
            latency_ms: result.elapsed.as_millis() as u64,
            error_kind: result.error.as_ref().map(|e| e.kind().to_string()),
            error_message: result.error.as_ref().map(|e| e.to_string()),
            unknown_outcome: result.is_unknown_outcome(),
        }
    }

    /// SOL value of the trade at the recorded price
    pub fn notional_sol(&self) -> Option<f64> {
        match self.side {
            IntentKind::Entry => Some(self.amount),
            IntentKind::Exit => self.price.map(|p| p * self.amount),
        }
    }
}
