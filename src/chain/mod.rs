// Execution plumbing: node pool, fees, relay seam and the bundler

pub mod bundler;
pub mod constants;
pub mod fee_optimizer;
pub mod relay;
pub mod rpc_pool;
pub mod types;

pub use bundler::{
    BundlerConfig, PendingSubmission, SubmissionResult, SubmissionTier, TradeExecutor,
    TransactionBundler, TxDetail, TxOutcome,
};
pub use fee_optimizer::{FeeConfig, FeeOptimizer};
pub use relay::{BundleRelay, BundleStatus};
pub use rpc_pool::{ProviderMetrics, ProviderSnapshot, RpcPool};
pub use types::{
    ChainClient, IntentKind, SignatureStatus, SignedTransaction, SwapBuilder, TradeIntent,
    UnsignedTransaction, Urgency, Wallet,
};
