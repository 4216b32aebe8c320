use async_trait::async_trait;

use super::types::SignedTransaction;
use crate::error::ExecutionError;

/// Status of a bundle as reported by the relay
#[derive(Debug, Clone, PartialEq)]
pub enum BundleStatus {
    Pending,
    Confirmed { slot: u64 },
    Rejected(String),
}

/// MEV-protected relay accepting all-or-nothing bundles
#[async_trait]
pub trait BundleRelay: Send + Sync {
    fn name(&self) -> &str;

    /// Submit the bundle and return the relay's bundle id
    async fn send_bundle(&self, txs: &[SignedTransaction]) -> Result<String, ExecutionError>;

    async fn bundle_status(&self, bundle_id: &str) -> Result<BundleStatus, ExecutionError>;
}
