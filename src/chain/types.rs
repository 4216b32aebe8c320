// Chain-agnostic execution types and the collaborator seams the core calls
// through. Concrete Solana implementations live in `crate::adapters`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ExecutionError, RpcError};

/// Direction of a trade intent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntentKind {
    Entry,
    Exit,
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntentKind::Entry => write!(f, "entry"),
            IntentKind::Exit => write!(f, "exit"),
        }
    }
}

/// How hard we are willing to pay for inclusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Urgency {
    Normal,
    High,
    Urgent,
    Sniping,
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Urgency::Normal => "normal",
            Urgency::High => "high",
            Urgency::Urgent => "urgent",
            Urgency::Sniping => "sniping",
        };
        f.write_str(name)
    }
}

/// A request to buy or sell one token.
///
/// `amount` is denominated in SOL for entries and in whole token units for
/// exits; the swap builder converts to base units.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeIntent {
    pub kind: IntentKind,
    pub token_id: String,
    pub amount: f64,
    pub slippage_bps: u64,
    /// Rug-pull exits skip the normal validation budgets.
    pub emergency: bool,
}

impl TradeIntent {
    pub fn entry(token_id: impl Into<String>, amount_sol: f64, slippage_bps: u64) -> Self {
        Self {
            kind: IntentKind::Entry,
            token_id: token_id.into(),
            amount: amount_sol,
            slippage_bps,
            emergency: false,
        }
    }

    pub fn exit(token_id: impl Into<String>, token_amount: f64, slippage_bps: u64) -> Self {
        Self {
            kind: IntentKind::Exit,
            token_id: token_id.into(),
            amount: token_amount,
            slippage_bps,
            emergency: false,
        }
    }

    pub fn emergency(mut self) -> Self {
        self.emergency = true;
        self
    }
}

/// Serialized transaction awaiting a signature
#[derive(Debug, Clone, PartialEq)]
pub struct UnsignedTransaction {
    pub token_id: String,
    pub payload: Vec<u8>,
    pub priority_fee: u64,
}

/// Signed, wire-ready transaction. Re-sending the same value is idempotent.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    pub signature: String,
    pub payload: Vec<u8>,
    pub priority_fee: u64,
}

/// Confirmation state of a signature as reported by a node
#[derive(Debug, Clone, PartialEq)]
pub enum SignatureStatus {
    /// Unknown to the node or not yet at the required commitment
    Pending,
    Confirmed { slot: u64 },
    Failed(String),
}

/// One upstream node endpoint
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn endpoint(&self) -> &str;

    /// Per-transaction priority fees observed in recent blocks
    async fn recent_priority_fees(&self) -> Result<Vec<u64>, RpcError>;

    /// Broadcast without waiting; returns the signature the node accepted
    async fn send_transaction(&self, tx: &SignedTransaction) -> Result<String, RpcError>;

    async fn signature_status(&self, signature: &str) -> Result<SignatureStatus, RpcError>;

    async fn token_decimals(&self, mint: &str) -> Result<u8, RpcError>;
}

/// Wallet/keystore collaborator
pub trait Wallet: Send + Sync {
    fn address(&self) -> String;

    fn sign(&self, tx: &UnsignedTransaction) -> Result<SignedTransaction, ExecutionError>;
}

/// Produces the unsigned swap transaction for an intent
#[async_trait]
pub trait SwapBuilder: Send + Sync {
    async fn build(
        &self,
        intent: &TradeIntent,
        priority_fee: u64,
        payer: &str,
    ) -> Result<UnsignedTransaction, ExecutionError>;
}
