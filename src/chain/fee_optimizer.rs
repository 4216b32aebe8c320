// Priority fee optimizer
//
// Keeps a short-lived cache of recently observed per-transaction priority fees
// and maps an urgency tier to a percentile of that sample:
//
//   normal  -> p50 x 1.0
//   high    -> p75 x 1.2
//   urgent  -> p90 x 1.5
//   sniping -> p90 x 1.5, never below the anti-MEV floor

use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::rpc_pool::RpcPool;
use super::types::Urgency;

/// Fee optimizer configuration (all fees in micro-lamports per CU)
#[derive(Debug, Clone)]
pub struct FeeConfig {
    pub cache_ttl: Duration,
    pub default_fee: u64,
    pub anti_mev_floor: u64,
    pub max_fee: u64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(5),
            default_fee: 10_000,
            anti_mev_floor: 100_000,
            max_fee: 5_000_000,
        }
    }
}

impl Urgency {
    /// Percentile of the fee sample used for this tier
    pub fn percentile(&self) -> f64 {
        match self {
            Urgency::Normal => 50.0,
            Urgency::High => 75.0,
            Urgency::Urgent | Urgency::Sniping => 90.0,
        }
    }

    pub fn multiplier(&self) -> f64 {
        match self {
            Urgency::Normal => 1.0,
            Urgency::High => 1.2,
            Urgency::Urgent | Urgency::Sniping => 1.5,
        }
    }
}

/// Nearest-rank percentile of an ascending sample
pub fn percentile(sorted: &[u64], pct: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);
    Some(sorted[idx])
}

/// Fee for a tier given an ascending sample. Pure; the optimizer calls it on
/// the cached sample.
pub fn fee_for_sample(sorted: &[u64], urgency: Urgency, config: &FeeConfig) -> u64 {
    let base = match percentile(sorted, urgency.percentile()) {
        Some(fee) => ((fee as f64) * urgency.multiplier()).round() as u64,
        None => config.default_fee,
    };

    // The cap never pushes a sniping fee under the floor
    let capped = base.min(config.max_fee.max(config.anti_mev_floor));

    if urgency == Urgency::Sniping {
        capped.max(config.anti_mev_floor)
    } else {
        capped
    }
}

/// Recommends priority fees from a cached network sample
pub struct FeeOptimizer {
    pool: Arc<RpcPool>,
    config: FeeConfig,
    sample_cache: Cache<(), Arc<Vec<u64>>>,
}

impl FeeOptimizer {
    pub fn new(pool: Arc<RpcPool>, config: FeeConfig) -> Self {
        let sample_cache = Cache::builder()
            .max_capacity(1)
            .time_to_live(config.cache_ttl)
            .build();

        Self {
            pool,
            config,
            sample_cache,
        }
    }

    pub fn config(&self) -> &FeeConfig {
        &self.config
    }

    /// Recommended priority fee for `urgency`
    pub async fn optimal_fee(&self, urgency: Urgency) -> u64 {
        let sample = self.sample().await;
        let fee = fee_for_sample(&sample, urgency, &self.config);
        debug!(%urgency, fee, sample_size = sample.len(), "Computed priority fee");
        fee
    }

    /// Cached ascending fee sample, refreshed through the pool on a miss.
    /// An empty sample means nothing could be fetched.
    async fn sample(&self) -> Arc<Vec<u64>> {
        if let Some(sample) = self.sample_cache.get(&()).await {
            return sample;
        }

        match self
            .pool
            .call("getRecentPrioritizationFees", |client| async move {
                client.recent_priority_fees().await
            })
            .await
        {
            Ok(mut fees) => {
                fees.sort_unstable();
                let sample = Arc::new(fees);
                if !sample.is_empty() {
                    self.sample_cache.insert((), Arc::clone(&sample)).await;
                }
                sample
            }
            Err(e) => {
                warn!(error = %e, "Failed to refresh fee sample, using default fee");
                Arc::new(Vec::new())
            }
        }
    }

    /// Drop the cached sample so the next call refetches
    pub async fn invalidate(&self) {
        self.sample_cache.invalidate(&()).await;
    }
}
