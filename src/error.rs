use thiserror::Error;

/// Failure of a single call against one node endpoint.
///
/// The pool retries both kinds; once the budget is spent the last error
/// decides which [`ExecutionError`] variant is surfaced.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    /// The request never got a well-formed answer (connect, timeout, io).
    #[error("transport: {0}")]
    Transport(String),

    /// The node answered with an error payload.
    #[error("remote error: {0}")]
    Remote(String),
}

/// Everything that can go wrong on the execution path.
///
/// Each variant names the last provider, relay or transaction involved so a
/// failure is never reported without the identifiers needed to chase it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("transport failure calling {method} after {attempts} attempts (last provider {provider}): {message}")]
    Transport {
        method: String,
        provider: String,
        attempts: u32,
        message: String,
    },

    #[error("remote call {method} failed after {attempts} attempts (last provider {provider}): {message}")]
    ContractCall {
        method: String,
        provider: String,
        attempts: u32,
        message: String,
    },

    #[error("transaction {signature} rejected on-chain: {reason}")]
    TransactionFailed { signature: String, reason: String },

    #[error("transaction {signature} not confirmed within {timeout_ms}ms, outcome unknown")]
    TransactionTimeout { signature: String, timeout_ms: u64 },

    #[error("insufficient liquidity for {token_id}: ${available_usd:.0} available, ${required_usd:.0} required")]
    InsufficientLiquidity {
        token_id: String,
        available_usd: f64,
        required_usd: f64,
    },

    #[error("bundle submission via {relay} failed (bundle {bundle_id:?}): {reason}")]
    BundleSubmission {
        relay: String,
        bundle_id: Option<String>,
        reason: String,
    },

    #[error("slippage exceeded for {token_id}: expected {expected:.10}, observed {observed:.10} (max {max_bps} bps)")]
    SlippageExceeded {
        token_id: String,
        expected: f64,
        observed: f64,
        max_bps: u64,
    },

    #[error("exit already in flight for {token_id} (submission #{pending_id})")]
    ExitInFlight { token_id: String, pending_id: u64 },

    #[error("failed to build transaction for {token_id}: {reason}")]
    Build { token_id: String, reason: String },
}

impl ExecutionError {
    /// Short machine-friendly name of the failure kind, used in logs and
    /// trade records.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::Transport { .. } => "transport",
            ExecutionError::ContractCall { .. } => "contract_call",
            ExecutionError::TransactionFailed { .. } => "transaction_failed",
            ExecutionError::TransactionTimeout { .. } => "transaction_timeout",
            ExecutionError::InsufficientLiquidity { .. } => "insufficient_liquidity",
            ExecutionError::BundleSubmission { .. } => "bundle_submission",
            ExecutionError::SlippageExceeded { .. } => "slippage_exceeded",
            ExecutionError::ExitInFlight { .. } => "exit_in_flight",
            ExecutionError::Build { .. } => "build",
        }
    }

    /// A timeout means the transaction may still land.
    pub fn is_unknown_outcome(&self) -> bool {
        matches!(self, ExecutionError::TransactionTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_identifiers() {
        let err = ExecutionError::Transport {
            method: "sendTransaction".to_string(),
            provider: "https://node-b".to_string(),
            attempts: 3,
            message: "connection reset".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("sendTransaction"));
        assert!(text.contains("https://node-b"));
        assert_eq!(err.kind(), "transport");

        let err = ExecutionError::TransactionTimeout {
            signature: "5xSig".to_string(),
            timeout_ms: 30_000,
        };
        assert!(err.to_string().contains("5xSig"));
        assert!(err.is_unknown_outcome());
    }

    #[test]
    fn test_rejection_is_not_unknown() {
        let err = ExecutionError::TransactionFailed {
            signature: "sig".to_string(),
            reason: "InstructionError".to_string(),
        };
        assert!(!err.is_unknown_outcome());
        assert_eq!(err.kind(), "transaction_failed");
    }
}
